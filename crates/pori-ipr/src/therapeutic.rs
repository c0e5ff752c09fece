//! Therapeutic options table built from therapeutic kbMatches

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pori_common::{IprVariant, KbMatch, Record};
use pori_graphkb::{GraphKb, vocab::get_terms_set};
use serde::{Deserialize, Serialize};

use crate::{
    error::{IprError, Result},
    util::{create_variant_name_tuple, find_variant, get_preferred_drug_representation},
};

pub const THERAPEUTIC: &str = "therapeutic";
pub const CHEMORESISTANCE: &str = "chemoresistance";

/// One row of the therapeutic options table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapeuticOption {
    pub gene: String,
    #[serde(rename = "type")]
    pub option_type: String,
    pub therapy: String,
    pub variant: String,
    pub evidence_level: String,
    pub context: String,
    pub notes: String,
    /// Position within options of the same type
    pub rank: usize,
}

#[derive(Default)]
struct Grouped {
    evidence_levels: BTreeSet<String>,
    contexts: BTreeSet<String>,
}

/// Therapeutic and chemoresistance options for the matched variants
///
/// Options are grouped by gene, type, therapy and variant. Therapies are shown
/// by their preferred drug representation.
pub async fn create_therapeutic_options(
    conn: &dyn GraphKb,
    kb_matches: &[KbMatch],
    variants: &[IprVariant],
) -> Result<Vec<TherapeuticOption>> {
    let resistance_markers = get_terms_set(conn, &["no sensitivity"], false).await?;
    let mut drugs: HashMap<String, Record> = HashMap::new();
    let mut groups: BTreeMap<(String, String, String, String), Grouped> = BTreeMap::new();

    for kb_match in kb_matches
        .iter()
        .filter(|m| m.category == THERAPEUTIC && m.relevance != "eligibility")
    {
        let option_type = if resistance_markers.contains(&kb_match.kb_relevance_id) {
            CHEMORESISTANCE
        } else {
            THERAPEUTIC
        };

        let variant = find_variant(variants, &kb_match.variant_type, &kb_match.variant)
            .ok_or_else(|| {
                IprError::validation(format!(
                    "No variant match found for {} ({})",
                    kb_match.variant, kb_match.variant_type
                ))
            })?;

        let drug = match drugs.get(&kb_match.kb_context_id) {
            Some(drug) => drug.clone(),
            None => {
                let drug = get_preferred_drug_representation(conn, &kb_match.kb_context_id).await?;
                drugs.insert(kb_match.kb_context_id.clone(), drug.clone());
                drug
            }
        };

        let (gene, variant_name) = create_variant_name_tuple(variant);
        let group = groups
            .entry((
                gene,
                option_type.to_string(),
                drug.display().to_string(),
                variant_name,
            ))
            .or_default();
        group.evidence_levels.insert(kb_match.evidence_level.clone());
        group.contexts.insert(kb_match.relevance.clone());
    }

    let join = |values: BTreeSet<String>, delimiter: &str| {
        values
            .into_iter()
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(delimiter)
    };

    let mut ranks: HashMap<String, usize> = HashMap::new();
    let mut options = Vec::new();
    for ((gene, option_type, therapy, variant), group) in groups {
        let rank = ranks.entry(option_type.clone()).or_insert(0);
        options.push(TherapeuticOption {
            gene,
            therapy,
            variant,
            evidence_level: join(group.evidence_levels, " / "),
            context: join(group.contexts, " / "),
            notes: String::new(),
            rank: *rank,
            option_type,
        });
        *rank += 1;
    }
    Ok(options)
}
