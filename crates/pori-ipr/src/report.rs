//! Building report sections from kbMatches
//!
//! Statements become kbMatches rows here, and the rows are then filtered
//! (germline, multi-variant and custom filters) and summarized into key
//! alterations, variant counts and expression plots.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use pori_common::{
    FusionVariant, ImageDefinition, IprGene, IprVariant, KbMatch, Record, Statement,
    variant_type,
};
use pori_graphkb::{
    GraphKb, GraphKbError, TermTreeOptions, from_rows,
    constants::RELEVANCE_BASE_TERMS,
    statement::categorize_relevance,
    vocab::{get_term_tree, get_terms_set},
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

pub use crate::util::trim_empty_values;
use crate::{
    constants::{
        APPROVED_EVIDENCE_LEVELS, GERMLINE_BASE_TERMS, IPR_APPROVED_LEVEL, IPR_SOURCE_NAME,
        VARIANT_CLASSES, VARIANT_COUNT_SECTIONS, VARIANT_SECTIONS,
    },
    error::{IprError, Result},
    util::find_variant,
};

/// Evidence level records that mark a therapy as approved
pub async fn get_approved_evidence_levels(conn: &dyn GraphKb) -> Result<Vec<Record>> {
    let filters: Vec<Value> = APPROVED_EVIDENCE_LEVELS
        .iter()
        .map(|(source, names)| {
            json!({"AND": [
                {"source": {"target": "Source", "filters": {"name": source}}},
                {"name": names, "operator": "IN"},
            ]})
        })
        .collect();
    Ok(from_rows(
        conn.query(&json!({"target": "EvidenceLevel", "filters": {"OR": filters}}))
            .await?,
    )?)
}

fn edge_rids(record: &Record, key: &str) -> Vec<String> {
    record
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|edge| match edge {
            Value::String(rid) => Some(rid.clone()),
            other => other.get("@rid").and_then(Value::as_str).map(str::to_string),
        })
        .collect()
}

/// Map of evidence level rid to the display name of its IPR evidence level
///
/// Levels are linked to IPR levels through `CrossReferenceOf` edges. The empty
/// rid maps to the empty string.
pub async fn get_evidencelevel_mapping(conn: &dyn GraphKb) -> Result<HashMap<String, String>> {
    let levels: Vec<Record> = from_rows(
        conn.query(&json!({
            "target": "EvidenceLevel",
            "returnProperties": [
                "@rid", "displayName", "source", "out_CrossReferenceOf", "in_CrossReferenceOf",
            ],
        }))
        .await?,
    )?;

    let ipr_source = match conn.get_source(IPR_SOURCE_NAME).await {
        Ok(source) => Some(source.rid),
        Err(GraphKbError::RecordCount { .. }) => {
            warn!("no {} source in GraphKB, evidence levels are not mapped", IPR_SOURCE_NAME);
            None
        }
        Err(err) => return Err(err.into()),
    };

    let mut cross_references: HashMap<String, String> = HashMap::new();
    let mut ipr_levels: HashMap<String, String> = HashMap::new();
    for level in levels
        .iter()
        .filter(|l| ipr_source.is_some() && l.source.as_ref().map(|s| s.rid()) == ipr_source.as_deref())
    {
        let name = level.display().to_string();
        for edge in edge_rids(level, "out_CrossReferenceOf") {
            cross_references.insert(edge, name.clone());
        }
        ipr_levels.insert(level.rid.clone(), name);
    }

    let mut mapping: HashMap<String, String> = levels
        .iter()
        .map(|level| {
            let mapped = edge_rids(level, "in_CrossReferenceOf")
                .into_iter()
                .find_map(|edge| cross_references.get(&edge).cloned())
                .or_else(|| ipr_levels.get(&level.rid).cloned())
                .unwrap_or_default();
            (level.rid.clone(), mapped)
        })
        .collect();
    mapping.insert(String::new(), String::new());
    Ok(mapping)
}

async fn get_recruitment_statuses(
    conn: &dyn GraphKb,
    statements: &[Statement],
) -> Result<HashMap<String, String>> {
    let trials: BTreeSet<&str> = statements
        .iter()
        .filter_map(|s| s.subject.as_ref())
        .filter(|subject| subject.class == "ClinicalTrial")
        .map(|subject| subject.rid.as_str())
        .collect();

    let mut statuses = HashMap::new();
    for rid in trials {
        let rows: Vec<Record> = from_rows(
            conn.query(&json!({
                "target": {"target": "ClinicalTrial", "filters": {"@rid": rid}},
                "returnProperties": ["@rid", "recruitmentStatus"],
            }))
            .await?,
        )?;
        if let Some(status) = rows
            .first()
            .and_then(|r| r.get("recruitmentStatus"))
            .and_then(Value::as_str)
        {
            statuses.insert(rid.to_string(), status.to_string());
        }
    }
    Ok(statuses)
}

fn joined_names<'a>(records: impl Iterator<Item = &'a Record>) -> String {
    let mut names: Vec<&str> = records.map(Record::display).collect();
    names.sort();
    names.join(";")
}

/// kbMatches rows for statements matched through `variant_matches`
///
/// One row is emitted per variant condition of the statement that is in
/// `variant_matches`. Prognostic statements are only kept for the report's
/// disease.
pub async fn convert_statements_to_alterations(
    conn: &dyn GraphKb,
    statements: &[Statement],
    disease_name: &str,
    variant_matches: &HashSet<String>,
) -> Result<Vec<KbMatch>> {
    let disease_matches: HashSet<String> =
        get_term_tree(conn, disease_name, &TermTreeOptions::for_class("Disease"))
            .await?
            .into_iter()
            .map(|r| r.rid)
            .collect();
    if disease_matches.is_empty() {
        return Err(IprError::validation(format!(
            "failed to match disease ({}) to graphkb",
            disease_name
        )));
    }
    if statements.is_empty() {
        return Ok(Vec::new());
    }

    let ev_map = get_evidencelevel_mapping(conn).await?;
    let mut approved: HashSet<String> = get_approved_evidence_levels(conn)
        .await?
        .into_iter()
        .map(|r| r.rid)
        .collect();
    approved.extend(
        ev_map
            .iter()
            .filter(|(_, ipr)| ipr.as_str() == IPR_APPROVED_LEVEL)
            .map(|(rid, _)| rid.clone()),
    );
    let recruitment = get_recruitment_statuses(conn, statements).await?;

    let mut rows = Vec::new();
    for statement in statements {
        let variants: Vec<&Record> = statement
            .conditions
            .iter()
            .filter(|c| VARIANT_CLASSES.contains(&c.class.as_str()))
            .collect();
        let diseases: Vec<&Record> = statement
            .conditions
            .iter()
            .filter(|c| c.class == "Disease")
            .collect();
        let disease_match = diseases.len() == 1 && disease_matches.contains(&diseases[0].rid);

        let category =
            categorize_relevance(conn, &statement.relevance.rid, RELEVANCE_BASE_TERMS).await?;

        let approved_therapy = category == "therapeutic"
            && statement
                .evidence_level
                .iter()
                .any(|level| approved.contains(&level.rid));

        if category == "prognostic" && !disease_match {
            continue;
        }

        let evidence_level = joined_names(statement.evidence_level.iter());
        let ipr_levels: BTreeSet<&str> = statement
            .evidence_level
            .iter()
            .filter_map(|level| ev_map.get(&level.rid))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
            .collect();
        let ipr_evidence_level = ipr_levels.into_iter().collect::<Vec<_>>().join(";");
        let reference = statement
            .evidence
            .iter()
            .map(Record::display)
            .collect::<Vec<_>>()
            .join(";");

        for variant in variants
            .into_iter()
            .filter(|v| variant_matches.contains(&v.rid))
        {
            let mut row = KbMatch {
                approved_therapy,
                category: if category.is_empty() {
                    "unknown".to_string()
                } else {
                    category.clone()
                },
                context: statement
                    .subject
                    .as_ref()
                    .map(|s| s.display().to_string())
                    .unwrap_or_default(),
                kb_context_id: statement
                    .subject
                    .as_ref()
                    .map(|s| s.rid.clone())
                    .unwrap_or_default(),
                disease: joined_names(diseases.iter().copied()),
                evidence_level: evidence_level.clone(),
                ipr_evidence_level: Some(ipr_evidence_level.clone()),
                kb_statement_id: statement.rid.clone(),
                kb_variant: variant.display().to_string(),
                kb_variant_id: variant.rid.clone(),
                matched_cancer: disease_match,
                reference: reference.clone(),
                relevance: statement.relevance.display().to_string(),
                kb_relevance_id: statement.relevance.rid.clone(),
                external_source: statement
                    .source
                    .as_ref()
                    .map(|s| s.display().to_string())
                    .unwrap_or_default(),
                external_statement_id: statement.source_id.clone(),
                review_status: statement.review_status.clone(),
                ..Default::default()
            };
            if statement.relevance.name.as_deref() == Some("eligibility") {
                row.kb_data.recruitment_status = Some(
                    recruitment
                        .get(&row.kb_context_id)
                        .cloned()
                        .unwrap_or_else(|| "not found".to_string()),
                );
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Drop matches whose germline status disagrees with the statement category
///
/// Germline categories (pharmacogenomic, cancer predisposition) are only kept on
/// germline variants, other categories are dropped from germline variants.
/// Variants without germline information are treated as somatic when
/// `assume_somatic` is set. Germline category matches whose variant cannot be
/// found are kept.
pub fn germline_kb_matches(
    kb_matches: Vec<KbMatch>,
    all_variants: &[IprVariant],
    assume_somatic: bool,
) -> Vec<KbMatch> {
    let (germline_matches, somatic_matches): (Vec<KbMatch>, Vec<KbMatch>) = kb_matches
        .into_iter()
        .partition(|m| GERMLINE_BASE_TERMS.contains(&m.category.as_str()));

    let variants_for = |key: &str| -> Vec<&IprVariant> {
        all_variants.iter().filter(|v| v.key() == key).collect()
    };

    let mut kept = Vec::new();
    if !germline_matches.is_empty() {
        info!("checking germline status of {:?}", GERMLINE_BASE_TERMS);
    }
    for alt in germline_matches {
        let variants = variants_for(&alt.variant);
        if variants.is_empty() {
            error!(
                "germline check fail for: {}: {} {}",
                alt.kb_statement_id, alt.kb_variant, alt.category
            );
            kept.push(alt);
        } else if variants.iter().any(|v| v.germline() == Some(true)) {
            debug!(
                "germline kbStatementId:{}: {} {}",
                alt.kb_statement_id, alt.kb_variant, alt.category
            );
            kept.push(alt);
        } else if variants.iter().any(|v| v.germline().is_none()) {
            warn!("germline no data fields for: {}", alt.variant);
            if !assume_somatic {
                kept.push(alt);
            }
        } else {
            debug!(
                "dropping somatic variant matched to germline category kbStatementId:{}",
                alt.kb_statement_id
            );
        }
    }

    for alt in somatic_matches {
        let variants = variants_for(&alt.variant);
        let somatic = variants
            .iter()
            .filter(|v| !v.germline().unwrap_or(!assume_somatic))
            .count();
        if !variants.is_empty() && somatic == 0 {
            debug!(
                "Dropping germline match to somatic statement kbStatementId:{}: {} {}",
                alt.kb_statement_id, alt.kb_variant, alt.category
            );
        } else {
            kept.push(alt);
        }
    }
    kept
}

/// Keep only matches to statements whose variant conditions were all matched
///
/// Conditions with a type under one of `excluded_types` do not need a match.
/// Matches to statements GraphKB does not return are kept.
pub async fn multi_variant_filtering(
    conn: &dyn GraphKb,
    kb_matches: Vec<KbMatch>,
    excluded_types: &[&str],
) -> Result<Vec<KbMatch>> {
    if kb_matches.is_empty() {
        return Ok(kb_matches);
    }
    let statement_rids: BTreeSet<&str> =
        kb_matches.iter().map(|m| m.kb_statement_id.as_str()).collect();
    let matched_variants: HashSet<&str> =
        kb_matches.iter().map(|m| m.kb_variant_id.as_str()).collect();

    let statements: Vec<Statement> = from_rows(
        conn.query(&json!({
            "target": "Statement",
            "filters": {"@rid": statement_rids, "operator": "IN"},
            "history": true,
            "returnProperties": ["@rid", "conditions.@rid", "conditions.@class", "conditions.type"],
        }))
        .await?,
    )?;

    let excluded = match excluded_types.first() {
        Some(first) if !first.is_empty() => get_terms_set(conn, excluded_types, false).await?,
        _ => HashSet::new(),
    };

    let incomplete: HashSet<&str> = statements
        .iter()
        .filter(|statement| {
            !statement
                .conditions
                .iter()
                .filter(|c| VARIANT_CLASSES.contains(&c.class.as_str()))
                .filter(|c| {
                    c.variant_type
                        .as_ref()
                        .is_none_or(|t| !excluded.contains(t.rid()))
                })
                .all(|c| matched_variants.contains(c.rid.as_str()))
        })
        .map(|s| s.rid.as_str())
        .collect();

    let before = kb_matches.len();
    let kept: Vec<KbMatch> = kb_matches
        .into_iter()
        .filter(|m| !incomplete.contains(m.kb_statement_id.as_str()))
        .collect();
    if kept.len() < before {
        info!(
            "removed {} matches to statements with unmatched variant conditions",
            before - kept.len()
        );
    }
    Ok(kept)
}

/// One custom kbMatches drop filter, by kbMatches field name
///
/// Each field maps to `(required, values)`. A row matches the filter when every
/// required field has one of its values and every other field has none of
/// them, e.g. `{"category": [true, ["cancer predisposition"]],
/// "externalSource": [false, ["CGL"]]}` drops cancer predisposition matches
/// not sourced from CGL.
pub type KbMatchFilter = BTreeMap<String, (bool, Vec<String>)>;

/// Custom kbMatches filters, a row is dropped when any filter matches it
pub type KbMatchFilters = Vec<KbMatchFilter>;

fn field_text(row: &Value, field: &str) -> String {
    match row.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn filter_matches(row: &Value, filter: &KbMatchFilter) -> bool {
    filter.iter().all(|(field, (required, values))| {
        values.contains(&field_text(row, field)) == *required
    })
}

/// Drop the rows matched by any of the filters
pub fn filter_kb_matches(kb_matches: Vec<KbMatch>, filters: &[KbMatchFilter]) -> Vec<KbMatch> {
    if filters.is_empty() {
        return kb_matches;
    }
    let before = kb_matches.len();
    let kept: Vec<KbMatch> = kb_matches
        .into_iter()
        .filter(|row| {
            let value = serde_json::to_value(row).unwrap_or(Value::Null);
            match filters.iter().find(|filter| filter_matches(&value, filter)) {
                Some(filter) => {
                    info!(
                        "Dropping kbStatementId:{}: {} - {:?}",
                        row.kb_statement_id, row.kb_variant, filter
                    );
                    false
                }
                None => true,
            }
        })
        .collect();
    info!("kbMatches filters removed {} of {} rows", before - kept.len(), before);
    kept
}

/// Key alterations and per-section variant counts
pub fn create_key_alterations(
    kb_matches: &[KbMatch],
    all_variants: &[IprVariant],
) -> (Vec<Value>, Value) {
    let sections: HashMap<&str, &str> = VARIANT_COUNT_SECTIONS.iter().copied().collect();
    let mut counts: BTreeMap<&str, BTreeSet<String>> = VARIANT_COUNT_SECTIONS
        .iter()
        .map(|(_, section)| (*section, BTreeSet::new()))
        .collect();
    let mut alterations = BTreeSet::new();
    let mut skipped_types = BTreeSet::new();

    for kb_match in kb_matches.iter().filter(|m| m.category != "unknown") {
        let Some(section) = sections.get(kb_match.variant_type.as_str()) else {
            if skipped_types.insert(kb_match.variant_type.as_str()) {
                warn!(
                    "No summary key alterations for {}.  Skipping {}",
                    kb_match.variant_type, kb_match.variant
                );
            }
            continue;
        };
        let Some(variant) = find_variant(all_variants, &kb_match.variant_type, &kb_match.variant)
        else {
            error!("No variant match found for {}", kb_match.variant);
            continue;
        };
        if let Some(count) = counts.get_mut(section) {
            count.insert(kb_match.variant.clone());
        }

        let label = match variant {
            IprVariant::Expression(v) => format!(
                "{} ({})",
                v.gene,
                v.expression_state.as_deref().unwrap_or("None")
            ),
            IprVariant::Copy(v) => {
                format!("{} ({})", v.gene, v.cnv_state.as_deref().unwrap_or("None"))
            }
            _ if GERMLINE_BASE_TERMS.contains(&kb_match.category.as_str())
                && variant.germline() == Some(true) =>
            {
                format!("germline {}", variant.variant())
            }
            _ => variant.variant().to_string(),
        };
        alterations.insert(label);
    }

    let counted: HashSet<&str> = counts.values().flatten().map(String::as_str).collect();
    let unknown = all_variants
        .iter()
        .filter(|v| !v.variant().is_empty() && !counted.contains(v.key()))
        .map(|v| v.key())
        .collect::<BTreeSet<_>>()
        .len();

    let mut variant_counts = serde_json::Map::new();
    for (section, keys) in &counts {
        variant_counts.insert(section.to_string(), json!(keys.len()));
    }
    variant_counts.insert("variantsUnknown".to_string(), json!(unknown));

    (
        alterations
            .into_iter()
            .map(|alt| json!({"geneVariant": alt}))
            .collect(),
        Value::Object(variant_counts),
    )
}

/// Keep structural variants that were matched or involve a known fusion partner
pub fn filter_structural_variants(
    structural_variants: Vec<FusionVariant>,
    kb_matches: &[KbMatch],
    gene_annotations: &[IprGene],
) -> Vec<FusionVariant> {
    let matched: HashSet<&str> = kb_matches
        .iter()
        .filter(|m| m.variant_type == variant_type::STRUCTURAL)
        .map(|m| m.variant.as_str())
        .collect();
    let fusion_genes: HashSet<&str> = gene_annotations
        .iter()
        .filter(|g| g.known_fusion_partner == Some(true))
        .map(|g| g.name.as_str())
        .collect();

    structural_variants
        .into_iter()
        .filter(|sv| {
            matched.contains(sv.key.as_str())
                || [&sv.gene1, &sv.gene2]
                    .into_iter()
                    .flatten()
                    .any(|gene| fusion_genes.contains(gene.as_str()))
        })
        .collect()
}

/// Expression density plots for genes with therapeutic matches
pub fn select_expression_plots(
    kb_matches: &[KbMatch],
    all_variants: &[IprVariant],
) -> Vec<ImageDefinition> {
    let selected: HashSet<(&str, &str)> = kb_matches
        .iter()
        .filter(|m| m.category == "therapeutic")
        .map(|m| (m.variant_type.as_str(), m.variant.as_str()))
        .collect();

    let mut selected_genes = BTreeSet::new();
    let mut images_by_gene: HashMap<&str, &str> = HashMap::new();
    for variant in all_variants {
        if selected.contains(&(variant.variant_type(), variant.key())) {
            selected_genes.extend(variant.genes());
        }
        if let Some(gene) = variant.gene()
            && let Some(path) = crate::util::histogram_image(variant)
        {
            images_by_gene.insert(gene, path);
        }
    }

    selected_genes
        .into_iter()
        .filter_map(|gene| {
            images_by_gene.get(gene).map(|path| ImageDefinition {
                key: format!("expDensity.{}", gene),
                path: path.to_string(),
                title: None,
                caption: None,
            })
        })
        .collect()
}

fn gene_properties(ipr_spec: &Value) -> Option<HashSet<&str>> {
    let properties = ipr_spec
        .pointer("/components/schemas/genesCreate/properties")?
        .as_object()?;
    Some(properties.keys().map(String::as_str).collect())
}

/// Drop content the IPR API does not accept
///
/// Gene fields are limited to the `genesCreate` properties of the IPR spec
/// when one is given.
pub fn clean_unsupported_content(upload_content: &mut Value, ipr_spec: Option<&Value>) {
    let Some(content) = upload_content.as_object_mut() else {
        return;
    };

    if let Some(allowed) = ipr_spec.and_then(gene_properties)
        && let Some(genes) = content.get_mut("genes").and_then(Value::as_array_mut)
    {
        let mut dropped = BTreeSet::new();
        for gene in genes.iter_mut().filter_map(Value::as_object_mut) {
            gene.retain(|key, _| {
                let keep = allowed.contains(key.as_str());
                if !keep {
                    dropped.insert(key.clone());
                }
                keep
            });
        }
        if !dropped.is_empty() {
            warn!("IPR unsupported property dropped from genes: {:?}", dropped);
        }
    }

    for section in VARIANT_SECTIONS {
        let Some(rows) = content.get_mut(*section).and_then(Value::as_array_mut) else {
            continue;
        };
        for row in rows.iter_mut().filter_map(Value::as_object_mut) {
            let has_display = row
                .get("displayName")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if !has_display {
                let display = ["variant", "kbCategory", "key"]
                    .iter()
                    .filter_map(|k| row.get(*k).and_then(Value::as_str))
                    .find(|s| !s.is_empty())
                    .unwrap_or_default()
                    .to_string();
                row.insert("displayName".to_string(), Value::String(display));
            }
            if *section != "probeResults" {
                for key in ["variant", "variantType", "histogramImage"] {
                    row.remove(key);
                }
            }
        }
    }

    if let Some(tmb) = content
        .get_mut("tmburMutationBurden")
        .and_then(Value::as_object_mut)
        && !tmb.contains_key("displayName")
        && let Some(category) = tmb.get("kbCategory").and_then(Value::as_str)
    {
        let display = category.to_string();
        tmb.insert("displayName".to_string(), Value::String(display));
    }

    if let Some(rows) = content.get_mut("kbMatches").and_then(Value::as_array_mut) {
        for row in rows.iter_mut().filter_map(Value::as_object_mut) {
            for key in ["kbContextId", "kbRelevanceId", "requiredKbMatches"] {
                row.remove(key);
            }
        }
    }
}
