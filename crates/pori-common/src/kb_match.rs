//! Report rows produced by annotation

use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Extra facts about how a match was made
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KbData {
    /// Match was made through a category variant built from another match
    #[serde(default, skip_serializing_if = "is_false")]
    pub inferred: bool,
    /// Recruitment status of the trial behind an eligibility statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recruitment_status: Option<String>,
}

/// One (variant, statement, matched kb variant) row of the report
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbMatch {
    /// `key` of the input variant row
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub variant_type: String,
    #[serde(default)]
    pub approved_therapy: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub kb_context_id: String,
    #[serde(default)]
    pub disease: String,
    #[serde(default)]
    pub evidence_level: String,
    #[serde(default)]
    pub ipr_evidence_level: Option<String>,
    #[serde(default)]
    pub kb_statement_id: String,
    #[serde(default)]
    pub kb_variant: String,
    #[serde(default)]
    pub kb_variant_id: String,
    #[serde(default)]
    pub matched_cancer: bool,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub relevance: String,
    #[serde(default)]
    pub kb_relevance_id: String,
    #[serde(default)]
    pub external_source: String,
    #[serde(default)]
    pub external_statement_id: Option<String>,
    #[serde(default)]
    pub review_status: Option<String>,
    #[serde(default)]
    pub kb_data: KbData,
}

/// Gene level annotation sent in the report `genes` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IprGene {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_statement_related: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_fusion_partner: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_small_mutation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tumour_suppressor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oncogene: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapeutic_associated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancer_gene_list_match: Option<bool>,
}

impl IprGene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// True when at least one annotation flag is set
    pub fn has_flag(&self) -> bool {
        [
            self.kb_statement_related,
            self.known_fusion_partner,
            self.known_small_mutation,
            self.tumour_suppressor,
            self.oncogene,
            self.therapeutic_associated,
            self.cancer_gene_list_match,
        ]
        .into_iter()
        .any(|flag| flag == Some(true))
    }
}

/// Image to attach to a report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub key: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}
