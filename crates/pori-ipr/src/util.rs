//! Helpers shared by the report modules

use std::collections::{HashMap, HashSet};

use md5::{Digest, Md5};
use pori_common::{IprVariant, Record};
use pori_graphkb::{GraphKb, GraphKbError, from_rows, util::ontology_preference_key};
use serde_json::{Value, json};

use crate::error::Result;

/// JSON text with `", "` and `": "` separators, the layout other PORI tools hash and encode
pub fn spaced_json(value: &Value) -> String {
    match value {
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(spaced_json).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), spaced_json(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => other.to_string(),
    }
}

/// md5 of the key fields, used when an input row has no key
pub fn hash_key(fields: &[String]) -> String {
    let body = spaced_json(&json!({ "key": fields }));
    let mut hasher = Md5::new();
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    const_hex::encode(&digest[..])
}

/// Drop empty string and null properties, fusion genes may stay null
pub fn trim_empty_values(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.retain(|key, v| {
            matches!(key.as_str(), "gene1" | "gene2") || !(v.is_null() || v.as_str() == Some(""))
        });
    }
    value
}

pub fn convert_to_rid_set(records: &[Record]) -> HashSet<String> {
    records.iter().map(|r| r.rid.clone()).collect()
}

/// The input variant a kbMatch row points back to
pub fn find_variant<'a>(
    variants: &'a [IprVariant],
    variant_type: &str,
    key: &str,
) -> Option<&'a IprVariant> {
    variants
        .iter()
        .find(|v| v.key() == key && v.variant_type() == variant_type)
}

/// (gene, variant) labels for a variant row in summary tables
pub fn create_variant_name_tuple(variant: &IprVariant) -> (String, String) {
    match variant {
        IprVariant::Expression(v) => (
            v.gene.clone(),
            v.expression_state.clone().unwrap_or_default(),
        ),
        IprVariant::Copy(v) => (v.gene.clone(), v.cnv_state.clone().unwrap_or_default()),
        _ => {
            let full = variant.variant();
            let label = full.split_once(':').map_or(full, |(_, rest)| rest);
            let gene = match variant {
                IprVariant::Fusion(v) => {
                    let genes: Vec<&str> = [v.gene1.as_deref(), v.gene2.as_deref()]
                        .into_iter()
                        .flatten()
                        .filter(|g| !g.is_empty())
                        .collect();
                    genes.join(", ")
                }
                other => other.gene().unwrap_or_default().to_string(),
            };
            (gene, label.to_string())
        }
    }
}

/// Path of an expression density plot for the variant, if any
pub fn histogram_image(variant: &IprVariant) -> Option<&str> {
    let image = match variant {
        IprVariant::Expression(v) => v.histogram_image.as_deref(),
        IprVariant::Copy(v) => v.extra.get("histogramImage").and_then(Value::as_str),
        IprVariant::SmallMutation(v) => v.extra.get("histogramImage").and_then(Value::as_str),
        IprVariant::Fusion(v) => v.extra.get("histogramImage").and_then(Value::as_str),
        IprVariant::Signature(v) => v.extra.get("histogramImage").and_then(Value::as_str),
    };
    image.filter(|path| !path.is_empty())
}

/// Preferred record among the equivalents of a therapy
///
/// Sources are ranked by their `sort` property.
pub async fn get_preferred_drug_representation(
    conn: &dyn GraphKb,
    drug_record_id: &str,
) -> Result<Record> {
    let sources: Vec<Record> = from_rows(
        conn.query(&json!({"target": "Source", "returnProperties": ["sort", "@rid"]}))
            .await?,
    )?;
    let source_sort: HashMap<String, i64> =
        sources.iter().map(|s| (s.rid.clone(), s.sort())).collect();

    let drugs: Vec<Record> = from_rows(
        conn.query(&json!({
            "target": [drug_record_id],
            "queryType": "similarTo",
            "treeEdges": [],
        }))
        .await?,
    )?;

    drugs
        .into_iter()
        .min_by(|a, b| {
            ontology_preference_key(a, &source_sort).cmp(&ontology_preference_key(b, &source_sort))
        })
        .ok_or_else(|| {
            GraphKbError::RecordCount {
                expected: 1,
                found: 0,
                context: format!("therapy {}", drug_record_id),
            }
            .into()
        })
}

/// Report version stamp
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pori_common::{CopyVariant, FusionVariant, SmallMutation};
    use pori_graphkb::mock::MockGraphKb;

    #[test]
    fn test_spaced_json_layout() {
        let value = json!({"target": ["#1:2", "#3:4"]});
        assert_eq!(spaced_json(&value), r##"{"target": ["#1:2", "#3:4"]}"##);
    }

    #[test]
    fn test_hash_key_is_stable() {
        let fields = vec!["KRAS".to_string(), "p.G12D".to_string()];
        let key = hash_key(&fields);
        assert_eq!(key.len(), 32);
        assert_eq!(key, hash_key(&fields));
        assert_ne!(key, hash_key(&["KRAS".to_string()]));
    }

    #[test]
    fn test_trim_empty_values_keeps_fusion_genes() {
        let trimmed = trim_empty_values(json!({
            "gene1": null,
            "gene2": "ALK",
            "breakpoint": "",
            "exon1": null,
            "highQuality": false,
        }));
        assert_eq!(
            trimmed,
            json!({"gene1": null, "gene2": "ALK", "highQuality": false})
        );
    }

    #[test]
    fn test_variant_name_tuple() {
        let copy = IprVariant::Copy(CopyVariant {
            gene: "ERBB2".into(),
            cnv_state: Some("amplification".into()),
            ..Default::default()
        });
        assert_eq!(
            create_variant_name_tuple(&copy),
            ("ERBB2".to_string(), "amplification".to_string())
        );

        let mutation = IprVariant::SmallMutation(SmallMutation {
            gene: "KRAS".into(),
            variant: "KRAS:p.G12D".into(),
            ..Default::default()
        });
        assert_eq!(
            create_variant_name_tuple(&mutation),
            ("KRAS".to_string(), "p.G12D".to_string())
        );

        let fusion = IprVariant::Fusion(FusionVariant {
            gene1: Some("EML4".into()),
            gene2: Some("ALK".into()),
            variant: "(EML4,ALK):fusion(e.13,e.20)".into(),
            ..Default::default()
        });
        assert_eq!(
            create_variant_name_tuple(&fusion),
            ("EML4, ALK".to_string(), "fusion(e.13,e.20)".to_string())
        );
    }

    #[tokio::test]
    async fn test_preferred_drug_uses_source_sort() {
        let conn = MockGraphKb::new().on_query(|body| match body.get("target")? {
            Value::String(class) if class == "Source" => Some(vec![
                json!({"@rid": "#1:1", "sort": 0}),
                json!({"@rid": "#1:2", "sort": 5}),
            ]),
            Value::Array(_) => Some(vec![
                json!({"@rid": "#9:2", "name": "cetuximab", "sourceId": "c1", "source": "#1:2", "displayName": "cetuximab [c1]"}),
                json!({"@rid": "#9:1", "name": "cetuximab", "sourceId": "db00002", "source": "#1:1", "displayName": "cetuximab [DB00002]"}),
            ]),
            _ => None,
        });

        let drug = get_preferred_drug_representation(&conn, "#9:2").await.unwrap();
        assert_eq!(drug.rid, "#9:1");
    }
}
