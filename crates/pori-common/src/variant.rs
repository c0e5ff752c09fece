//! IPR variant rows
//!
//! Every row carries a `key` that kbMatches refer back to, the `variant` string
//! used for matching and a `variantType` tag. Columns the tooling does not read
//! are kept in `extra` and passed through to the report unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lenient::{opt_bool, opt_i64, opt_string, string};

/// `variantType` tags used by IPR
pub mod variant_type {
    pub const SMALL_MUTATION: &str = "mut";
    pub const COPY: &str = "cnv";
    pub const STRUCTURAL: &str = "sv";
    pub const EXPRESSION: &str = "exp";
    pub const MSI: &str = "msi";
    pub const TMB: &str = "tmb";
}

/// Copy number variant (`cnv`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyVariant {
    #[serde(default, deserialize_with = "string")]
    pub key: String,
    #[serde(default, deserialize_with = "string")]
    pub variant: String,
    #[serde(default, deserialize_with = "string")]
    pub variant_type: String,
    #[serde(default, deserialize_with = "string")]
    pub gene: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub kb_category: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub cnv_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Expression outlier (`exp`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionVariant {
    #[serde(default, deserialize_with = "string")]
    pub key: String,
    #[serde(default, deserialize_with = "string")]
    pub variant: String,
    #[serde(default, deserialize_with = "string")]
    pub variant_type: String,
    #[serde(default, deserialize_with = "string")]
    pub gene: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub kb_category: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub expression_state: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub histogram_image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Small mutation: SNV, indel or MNV (`mut`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmallMutation {
    #[serde(default, deserialize_with = "string")]
    pub key: String,
    #[serde(default, deserialize_with = "string")]
    pub variant: String,
    #[serde(default, deserialize_with = "string")]
    pub variant_type: String,
    #[serde(default, deserialize_with = "string")]
    pub gene: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub protein_change: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub hgvs_protein: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub hgvs_cds: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub hgvs_genomic: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub germline: Option<bool>,
    #[serde(
        default,
        deserialize_with = "opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_position: Option<i64>,
    #[serde(
        default,
        deserialize_with = "opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_position: Option<i64>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub chromosome: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub transcript: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub ref_seq: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub alt_seq: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structural variant / gene fusion (`sv`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionVariant {
    #[serde(default, deserialize_with = "string")]
    pub key: String,
    #[serde(default, deserialize_with = "string")]
    pub variant: String,
    #[serde(default, deserialize_with = "string")]
    pub variant_type: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub gene1: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub gene2: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub exon1: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub exon2: Option<i64>,
    #[serde(
        default,
        deserialize_with = "opt_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub high_quality: Option<bool>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub breakpoint: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub svg: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub hgvs_protein: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub hgvs_cds: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub hgvs_genomic: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Genome-wide signature call such as MSI or high mutation burden
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureVariant {
    #[serde(default, deserialize_with = "string")]
    pub key: String,
    #[serde(default, deserialize_with = "string")]
    pub variant: String,
    #[serde(default, deserialize_with = "string")]
    pub variant_type: String,
    #[serde(default, deserialize_with = "opt_string")]
    pub kb_category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any variant row that can be annotated
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IprVariant {
    SmallMutation(SmallMutation),
    Copy(CopyVariant),
    Expression(ExpressionVariant),
    Fusion(FusionVariant),
    Signature(SignatureVariant),
}

impl IprVariant {
    pub fn key(&self) -> &str {
        match self {
            IprVariant::SmallMutation(v) => &v.key,
            IprVariant::Copy(v) => &v.key,
            IprVariant::Expression(v) => &v.key,
            IprVariant::Fusion(v) => &v.key,
            IprVariant::Signature(v) => &v.key,
        }
    }

    pub fn variant(&self) -> &str {
        match self {
            IprVariant::SmallMutation(v) => &v.variant,
            IprVariant::Copy(v) => &v.variant,
            IprVariant::Expression(v) => &v.variant,
            IprVariant::Fusion(v) => &v.variant,
            IprVariant::Signature(v) => &v.variant,
        }
    }

    pub fn variant_type(&self) -> &str {
        match self {
            IprVariant::SmallMutation(v) => &v.variant_type,
            IprVariant::Copy(v) => &v.variant_type,
            IprVariant::Expression(v) => &v.variant_type,
            IprVariant::Fusion(v) => &v.variant_type,
            IprVariant::Signature(v) => &v.variant_type,
        }
    }

    /// Single gene of the row, `None` for fusions and signatures
    pub fn gene(&self) -> Option<&str> {
        match self {
            IprVariant::SmallMutation(v) => Some(v.gene.as_str()),
            IprVariant::Copy(v) => Some(v.gene.as_str()),
            IprVariant::Expression(v) => Some(v.gene.as_str()),
            IprVariant::Fusion(_) | IprVariant::Signature(_) => None,
        }
        .filter(|g| !g.is_empty())
    }

    /// All non-empty genes of the row
    pub fn genes(&self) -> Vec<&str> {
        match self {
            IprVariant::Fusion(v) => [v.gene1.as_deref(), v.gene2.as_deref()]
                .into_iter()
                .flatten()
                .filter(|g| !g.is_empty())
                .collect(),
            _ => self.gene().into_iter().collect(),
        }
    }

    /// Germline flag, `None` when the input did not say
    pub fn germline(&self) -> Option<bool> {
        match self {
            IprVariant::SmallMutation(v) => v.germline,
            IprVariant::Copy(v) => extra_bool(&v.extra, "germline"),
            IprVariant::Expression(v) => extra_bool(&v.extra, "germline"),
            IprVariant::Fusion(v) => extra_bool(&v.extra, "germline"),
            IprVariant::Signature(v) => extra_bool(&v.extra, "germline"),
        }
    }

    pub fn kb_category(&self) -> Option<&str> {
        match self {
            IprVariant::Copy(v) => v.kb_category.as_deref(),
            IprVariant::Expression(v) => v.kb_category.as_deref(),
            IprVariant::Signature(v) => v.kb_category.as_deref(),
            IprVariant::SmallMutation(_) | IprVariant::Fusion(_) => None,
        }
    }

    /// Row as a JSON object, the shape IPR receives
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn extra_bool(extra: &Map<String, Value>, key: &str) -> Option<bool> {
    match extra.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => crate::lenient::parse_bool(s).ok().flatten(),
        _ => None,
    }
}

impl From<SmallMutation> for IprVariant {
    fn from(v: SmallMutation) -> Self {
        IprVariant::SmallMutation(v)
    }
}

impl From<CopyVariant> for IprVariant {
    fn from(v: CopyVariant) -> Self {
        IprVariant::Copy(v)
    }
}

impl From<ExpressionVariant> for IprVariant {
    fn from(v: ExpressionVariant) -> Self {
        IprVariant::Expression(v)
    }
}

impl From<FusionVariant> for IprVariant {
    fn from(v: FusionVariant) -> Self {
        IprVariant::Fusion(v)
    }
}

impl From<SignatureVariant> for IprVariant {
    fn from(v: SignatureVariant) -> Self {
        IprVariant::Signature(v)
    }
}
