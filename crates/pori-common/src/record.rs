//! GraphKB records
//!
//! GraphKB returns loosely shaped JSON: the fields present depend on the record
//! class and on the `returnProperties` of the query. The structs here type the
//! fields the tooling reads and keep everything else in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lenient::null_as_default;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Any GraphKB record (Feature, Vocabulary, Variant, Disease, Therapy, ...)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "@rid", default)]
    pub rid: String,
    #[serde(rename = "@class", default)]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biotype: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_false"
    )]
    pub deprecated: bool,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_false"
    )]
    pub alias: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Link>,

    // Variant fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference1: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference2: Option<Link>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub variant_type: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break1_start: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break1_end: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break2_start: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break2_end: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_seq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untemplated_seq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untemplated_seq_size: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Create a bare record with only a rid and class
    pub fn new(rid: &str, class: &str) -> Self {
        Self {
            rid: rid.to_string(),
            class: class.to_string(),
            ..Default::default()
        }
    }

    /// Human readable label: displayName, then name, then the rid
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.rid)
    }

    /// Name of the record's source when it was returned embedded
    pub fn source_name(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.record())
            .and_then(|s| s.name.as_deref())
    }

    /// Name of the variant type when it was returned embedded
    pub fn type_name(&self) -> Option<&str> {
        self.variant_type
            .as_ref()
            .and_then(|t| t.record())
            .and_then(|t| t.name.as_deref())
    }

    /// Property lookup for fields that are not typed on the struct
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Numeric `sort` value of a Source record, lower sorts first
    pub fn sort(&self) -> i64 {
        self.extra
            .get("sort")
            .and_then(Value::as_i64)
            .unwrap_or(99999)
    }
}

/// A reference to another record, returned either as a rid or embedded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Rid(String),
    Record(Box<Record>),
}

impl Link {
    pub fn rid(&self) -> &str {
        match self {
            Link::Rid(rid) => rid,
            Link::Record(record) => &record.rid,
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Link::Rid(_) => None,
            Link::Record(record) => Some(record),
        }
    }
}

impl From<Record> for Link {
    fn from(record: Record) -> Self {
        Link::Record(Box::new(record))
    }
}

/// Breakpoint position of a positional variant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "@class", default)]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Position {
    pub fn new(class: &str, pos: i64) -> Self {
        Self {
            class: class.to_string(),
            pos: Some(pos),
            extra: Map::new(),
        }
    }

    pub fn is_cytoband(&self) -> bool {
        self.class == "CytobandPosition"
    }
}

/// Result of the GraphKB variant notation parser
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedVariant {
    #[serde(default)]
    pub reference1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference2: Option<String>,
    #[serde(rename = "type", default)]
    pub variant_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break1_start: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break1_end: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break2_start: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break2_end: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_seq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untemplated_seq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untemplated_seq_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GraphKB Statement with its conditions and evidence embedded
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "@rid", default)]
    pub rid: String,
    #[serde(rename = "@class", default)]
    pub class: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relevance: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Record>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conditions: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence_level: Vec<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_template: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statement {
    /// Name of the statement's source (e.g. "oncokb"), empty when unknown
    pub fn source_name(&self) -> &str {
        self.source
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("")
    }
}

/// True for GraphKB record ids such as `#12:3`
pub fn is_rid(value: &str) -> bool {
    let Some(body) = value.strip_prefix('#') else {
        return false;
    };
    match body.split_once(':') {
        Some((cluster, position)) => {
            !cluster.is_empty()
                && !position.is_empty()
                && cluster.bytes().all(|b| b.is_ascii_digit())
                && position.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Rids of the given records, in order
pub fn convert_to_rid_list(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.rid.clone()).collect()
}
