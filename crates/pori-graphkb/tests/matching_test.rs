//! Variant matching against a scripted GraphKB

use pori_graphkb::{
    FeatureOptions, GraphKbError,
    matching::{match_copy_variant, match_positional_variant},
    mock::{MockGraphKb, query_class, query_type},
};
use serde_json::{Value, json};

const GENES: &[(&str, &str)] = &[("KRAS", "#10:1"), ("ALK", "#10:2"), ("EML4", "#10:3")];

/// Gene name searched for by an equivalent features query
fn feature_name(body: &Value) -> Option<&str> {
    if query_class(body) != Some("Feature") {
        return None;
    }
    body["target"]["filters"]
        .as_array()?
        .iter()
        .find_map(|filter| filter["OR"].as_array()?.iter().find_map(|f| f["name"].as_str()))
}

fn graphkb() -> MockGraphKb {
    MockGraphKb::new()
        .with_term_tree(
            "Vocabulary",
            &[
                ("missense mutation", "substitution"),
                ("substitution", "mutation"),
                ("in-frame fusion", "fusion"),
                ("fusion", "structural variant"),
                ("amplification", "copy gain"),
                ("copy gain", "copy variant"),
                ("copy variant", "structural variant"),
            ],
        )
        .on_query(|body| {
            let name = feature_name(body)?;
            let rid = GENES.iter().find(|(gene, _)| *gene == name).map(|(_, rid)| *rid);
            Some(
                rid.map(|rid| json!({"@rid": rid, "@class": "Feature", "name": name}))
                    .into_iter()
                    .collect(),
            )
        })
}

fn protein_pos(pos: i64) -> Value {
    json!({"@class": "ProteinPosition", "pos": pos})
}

fn exon_pos(pos: i64) -> Value {
    json!({"@class": "ExonicPosition", "pos": pos})
}

fn substitution(rid: &str, pos: i64, alt: &str) -> Value {
    json!({
        "@rid": rid,
        "@class": "PositionalVariant",
        "type": {"@rid": "substitution", "name": "substitution"},
        "break1Start": protein_pos(pos),
        "refSeq": "G",
        "untemplatedSeq": alt,
    })
}

fn rids(records: &[pori_common::Record]) -> Vec<&str> {
    records.iter().map(|r| r.rid.as_str()).collect()
}

#[tokio::test]
async fn test_positional_match_filters_candidates() {
    let conn = graphkb()
        .on_parse(
            "KRAS:p.G12D",
            json!({
                "reference1": "KRAS",
                "type": "substitution",
                "break1Start": protein_pos(12),
                "refSeq": "G",
                "untemplatedSeq": "D",
            }),
        )
        .on_query(|body| {
            (query_class(body) == Some("PositionalVariant")).then(|| {
                vec![
                    substitution("#20:1", 12, "D"),
                    substitution("#20:2", 13, "D"),
                    substitution("#20:3", 12, "V"),
                ]
            })
        })
        .on_query(|body| {
            (query_class(body) == Some("CategoryVariant"))
                .then(|| vec![json!({"@rid": "#21:1", "@class": "CategoryVariant"})])
        })
        .on_query(|body| {
            (query_type(body) == Some("similarTo") && body["target"].is_array()).then(|| {
                vec![
                    json!({"@rid": "#20:1", "@class": "PositionalVariant"}),
                    json!({"@rid": "#20:4", "@class": "PositionalVariant"}),
                ]
            })
        });

    let matches = match_positional_variant(&conn, "KRAS:p.G12D", &FeatureOptions::default())
        .await
        .unwrap();
    assert_eq!(rids(&matches), vec!["#21:1", "#20:1", "#20:4"]);

    let queries = conn.queries();
    let candidates = queries
        .iter()
        .find(|q| query_class(q) == Some("PositionalVariant"))
        .unwrap();
    assert!(
        candidates["filters"]
            .as_array()
            .unwrap()
            .contains(&json!({"reference2": null}))
    );
    let expanded = queries
        .iter()
        .find(|q| q["target"].is_array() && query_type(q) == Some("similarTo"))
        .unwrap();
    assert_eq!(expanded["target"], json!(["#20:1"]));
}

#[tokio::test]
async fn test_fusion_matches_second_gene() {
    let conn = graphkb()
        .on_parse(
            "(ALK,EML4):fusion(e.20,e.13)",
            json!({
                "reference1": "ALK",
                "reference2": "EML4",
                "type": "fusion",
                "break1Start": exon_pos(20),
                "break2Start": exon_pos(13),
            }),
        )
        .on_query(|body| {
            (query_class(body) == Some("PositionalVariant")).then(|| {
                vec![
                    json!({
                        "@rid": "#22:1",
                        "@class": "PositionalVariant",
                        "type": "fusion",
                        "break1Start": exon_pos(20),
                        "break2Start": exon_pos(13),
                    }),
                    json!({
                        "@rid": "#22:2",
                        "@class": "PositionalVariant",
                        "type": "fusion",
                        "break1Start": exon_pos(20),
                    }),
                ]
            })
        });

    let matches = match_positional_variant(
        &conn,
        "(ALK,EML4):fusion(e.20,e.13)",
        &FeatureOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(rids(&matches), vec!["#22:1"]);

    let queries = conn.queries();
    let second_gene = json!({"reference2": ["#10:3"], "operator": "IN"});
    let candidates = queries
        .iter()
        .find(|q| query_class(q) == Some("PositionalVariant"))
        .unwrap();
    assert!(candidates["filters"].as_array().unwrap().contains(&second_gene));
    let categories = queries
        .iter()
        .find(|q| query_class(q) == Some("CategoryVariant"))
        .unwrap();
    assert!(
        categories["target"]["filters"]
            .as_array()
            .unwrap()
            .contains(&second_gene)
    );
}

#[tokio::test]
async fn test_unknown_gene_not_found() {
    let conn = graphkb().on_parse(
        "BRAF:p.V600E",
        json!({"reference1": "BRAF", "type": "substitution", "break1Start": protein_pos(600)}),
    );
    let err = match_positional_variant(&conn, "BRAF:p.V600E", &FeatureOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphKbError::FeatureNotFound(_)));
}

#[tokio::test]
async fn test_uncertain_breakpoint_not_implemented() {
    let conn = graphkb().on_parse(
        "KRAS:p.(G12_G13)D",
        json!({
            "reference1": "KRAS",
            "type": "substitution",
            "break1Start": protein_pos(12),
            "break1End": protein_pos(13),
        }),
    );
    let err = match_positional_variant(&conn, "KRAS:p.(G12_G13)D", &FeatureOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphKbError::NotImplemented(_)));
}

#[tokio::test]
async fn test_invalid_copy_category() {
    let conn = graphkb();
    let err = match_copy_variant(&conn, "KRAS", "big gain", false, &FeatureOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphKbError::InvalidInput(_)));
    assert!(conn.queries().is_empty());
}

#[tokio::test]
async fn test_copy_variant_drops_homozygous() {
    let conn = graphkb().on_query(|body| {
        (query_class(body) == Some("CategoryVariant")).then(|| {
            vec![
                json!({"@rid": "#23:1", "@class": "CategoryVariant"}),
                json!({"@rid": "#23:2", "@class": "CategoryVariant", "zygosity": "homozygous"}),
            ]
        })
    });

    let all = match_copy_variant(&conn, "KRAS", "amplification", false, &FeatureOptions::default())
        .await
        .unwrap();
    assert_eq!(rids(&all), vec!["#23:1", "#23:2"]);

    let kept = match_copy_variant(&conn, "KRAS", "amplification", true, &FeatureOptions::default())
        .await
        .unwrap();
    assert_eq!(rids(&kept), vec!["#23:1"]);

    let categories = conn
        .queries()
        .into_iter()
        .find(|q| query_class(q) == Some("CategoryVariant"))
        .unwrap();
    let types = &categories["target"]["filters"][1]["type"];
    assert_eq!(types, &json!(["amplification", "copy gain", "copy variant"]));
}
