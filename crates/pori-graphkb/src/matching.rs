//! Matching input variants to GraphKB variant records
//!
//! Every matcher resolves the gene (or signature) to all of its equivalent
//! Feature records, resolves the variant type to its term tree, and then asks
//! GraphKB for variant records on those features with one of those types.
//! Results are expanded through `similarTo` so that aliases, cross references
//! and inferred variants are matched as well.

use std::collections::HashSet;

use pori_common::{ParsedVariant, Position, Record, convert_to_rid_list, is_rid};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    connection::{GraphKb, QueryOptions, query_as_with},
    constants::{
        AMBIGUOUS_AA, POS_VARIANT_RETURN_PROPERTIES, SIMILARITY_EDGES, VARIANT_RETURN_PROPERTIES,
        copy_category, expression_category,
    },
    error::{GraphKbError, Result},
    util::strip_version,
    vocab::{TermTreeOptions, get_equivalent_terms, get_term_tree},
};

/// How a gene name should be looked up
#[derive(Clone, Debug, Default)]
pub struct FeatureOptions<'a> {
    /// Restrict to features from this source (e.g. "entrez gene")
    pub source: &'a str,
    /// Match on sourceId only
    pub is_source_id: bool,
    pub source_id_version: &'a str,
    pub ignore_cache: bool,
}

/// Kind of record the category variant is attached to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceClass {
    #[default]
    Feature,
    Signature,
}

/// All Feature records equivalent to the gene name, id or rid
pub async fn get_equivalent_features(
    conn: &dyn GraphKb,
    gene_name: &str,
    options: &FeatureOptions<'_>,
) -> Result<Vec<Record>> {
    let query_options = QueryOptions::ignore_cache(options.ignore_cache);

    if is_rid(gene_name) {
        return query_as_with(
            conn,
            &json!({"target": [gene_name], "queryType": "similarTo"}),
            query_options,
        )
        .await;
    }

    let mut filters = Vec::new();
    if !options.source.is_empty() {
        filters.push(json!({"source": {"target": "Source", "filters": {"name": options.source}}}));
    }

    let (name, version) = strip_version(gene_name);
    if version.is_some() {
        debug!(
            "Assuming {} has a .version format, ignoring the version for equivalent features",
            gene_name
        );
    }

    if options.is_source_id || !options.source_id_version.is_empty() {
        filters.push(json!({"sourceId": name}));
        if !options.source_id_version.is_empty() {
            filters.push(json!({"OR": [
                {"sourceIdVersion": options.source_id_version},
                {"sourceIdVersion": null},
            ]}));
        }
    } else {
        filters.push(json!({"OR": [{"sourceId": name}, {"name": name}]}));
    }

    query_as_with(
        conn,
        &json!({
            "target": {"target": "Feature", "filters": filters},
            "queryType": "similarTo",
        }),
        query_options,
    )
    .await
}

/// Category variants on the reference whose type falls under `category`
pub async fn match_category_variant(
    conn: &dyn GraphKb,
    reference_name: &str,
    category: &str,
    root_exclude_term: &str,
    reference_class: ReferenceClass,
    options: &FeatureOptions<'_>,
) -> Result<Vec<Record>> {
    let references = match reference_class {
        ReferenceClass::Feature => {
            let features = get_equivalent_features(conn, reference_name, options).await?;
            if features.is_empty() {
                return Err(GraphKbError::FeatureNotFound(format!(
                    "unable to find the gene ({}) or any equivalent representations",
                    reference_name
                )));
            }
            convert_to_rid_list(&features)
        }
        ReferenceClass::Signature => {
            let term_options = TermTreeOptions {
                ontology_class: "Signature",
                ignore_cache: options.ignore_cache,
                ..Default::default()
            };
            let name = reference_name.to_lowercase();
            convert_to_rid_list(&get_equivalent_terms(conn, &name, &term_options).await?)
        }
    };
    if references.is_empty() {
        return Err(GraphKbError::InvalidInput(format!(
            "unable to find the term/signature ({}) or any equivalent",
            reference_name
        )));
    }

    let term_options = TermTreeOptions {
        root_exclude_term,
        ignore_cache: options.ignore_cache,
        ..Default::default()
    };
    let types = convert_to_rid_list(&get_term_tree(conn, category, &term_options).await?);
    if types.is_empty() {
        return Err(GraphKbError::InvalidInput(format!(
            "unable to find the variant type ({})",
            category
        )));
    }

    query_as_with(
        conn,
        &json!({
            "target": {
                "target": "CategoryVariant",
                "filters": [
                    {"reference1": references, "operator": "IN"},
                    {"type": types, "operator": "IN"},
                ],
            },
            "queryType": "similarTo",
            "edges": SIMILARITY_EDGES,
            "treeEdges": ["Infers"],
            "returnProperties": VARIANT_RETURN_PROPERTIES,
        }),
        QueryOptions::ignore_cache(options.ignore_cache),
    )
    .await
}

/// Category variants matching a copy number call
pub async fn match_copy_variant(
    conn: &dyn GraphKb,
    gene_name: &str,
    category: &str,
    drop_homozygous: bool,
    options: &FeatureOptions<'_>,
) -> Result<Vec<Record>> {
    if !copy_category::ALL.contains(&category) {
        return Err(GraphKbError::InvalidInput(format!(
            "not a valid copy variant input category ({})",
            category
        )));
    }
    let result = match_category_variant(
        conn,
        gene_name,
        category,
        "structural variant",
        ReferenceClass::Feature,
        options,
    )
    .await?;

    if drop_homozygous {
        return Ok(result
            .into_iter()
            .filter(|row| row.get("zygosity").and_then(Value::as_str) != Some("homozygous"))
            .collect());
    }
    Ok(result)
}

/// Category variants matching an expression outlier call
pub async fn match_expression_variant(
    conn: &dyn GraphKb,
    gene_name: &str,
    category: &str,
    options: &FeatureOptions<'_>,
) -> Result<Vec<Record>> {
    if !expression_category::ALL.contains(&category) {
        return Err(GraphKbError::InvalidInput(format!(
            "not a valid expression variant input category ({})",
            category
        )));
    }
    match_category_variant(
        conn,
        gene_name,
        category,
        "biological",
        ReferenceClass::Feature,
        options,
    )
    .await
}

/// True when `pos_record` falls inside `[range_start, range_end]`
///
/// A missing position is unknown and overlaps everything.
pub fn positions_overlap(
    pos_record: &Position,
    range_start: &Position,
    range_end: Option<&Position>,
) -> Result<bool> {
    if pos_record.is_cytoband()
        || range_start.is_cytoband()
        || range_end.is_some_and(Position::is_cytoband)
    {
        return Err(GraphKbError::NotImplemented(
            "cannot compare cytoband positions".to_string(),
        ));
    }

    let Some(pos) = pos_record.pos else {
        return Ok(true);
    };
    let start = range_start.pos;

    if let Some(range_end) = range_end {
        if start.is_some_and(|start| pos < start) {
            return Ok(false);
        }
        if range_end.pos.is_some_and(|end| pos > end) {
            return Ok(false);
        }
        return Ok(true);
    }
    Ok(start.is_none_or(|start| pos == start))
}

fn sequences_compatible(variant_seq: &str, reference_seq: &str) -> bool {
    if AMBIGUOUS_AA.contains(&variant_seq) || AMBIGUOUS_AA.contains(&reference_seq) {
        variant_seq.len() == reference_seq.len()
    } else {
        variant_seq.eq_ignore_ascii_case(reference_seq)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Whether a GraphKB positional variant is compatible with the parsed input
pub fn compare_positional_variants(variant: &ParsedVariant, reference: &Record) -> Result<bool> {
    if let (Some(start), Some(ref_start)) = (&variant.break1_start, &reference.break1_start)
        && !positions_overlap(start, ref_start, reference.break1_end.as_ref())?
    {
        return Ok(false);
    }

    if let Some(start) = &variant.break2_start {
        let Some(ref_start) = &reference.break2_start else {
            return Ok(false);
        };
        if !positions_overlap(start, ref_start, reference.break2_end.as_ref())? {
            return Ok(false);
        }
    }

    if let (Some(seq), Some(ref_seq)) = (
        non_empty(&variant.untemplated_seq),
        non_empty(&reference.untemplated_seq),
    ) {
        if let (Some(size), Some(ref_size)) =
            (variant.untemplated_seq_size, reference.untemplated_seq_size)
            && size != ref_size
        {
            return Ok(false);
        }
        if !sequences_compatible(seq, ref_seq) {
            return Ok(false);
        }
    }

    if let (Some(seq), Some(ref_seq)) = (non_empty(&variant.ref_seq), non_empty(&reference.ref_seq))
        && !sequences_compatible(seq, ref_seq)
    {
        return Ok(false);
    }

    Ok(true)
}

/// GraphKB variants matching a variant notation string (e.g. `KRAS:p.G12D`)
pub async fn match_positional_variant(
    conn: &dyn GraphKb,
    variant_string: &str,
    options: &FeatureOptions<'_>,
) -> Result<Vec<Record>> {
    let parsed = conn.parse(variant_string, false).await?;

    if parsed.break1_end.is_some() || parsed.break2_end.is_some() {
        return Err(GraphKbError::NotImplemented(format!(
            "matching does not support uncertain positions ({}) as breakpoints",
            variant_string
        )));
    }

    let features = convert_to_rid_list(
        &get_equivalent_features(conn, &parsed.reference1, options).await?,
    );
    if features.is_empty() {
        return Err(GraphKbError::FeatureNotFound(format!(
            "unable to find the gene ({}) or any equivalent representations",
            parsed.reference1
        )));
    }

    let secondary_features = match parsed.reference2.as_deref().filter(|r| !r.is_empty()) {
        Some(reference2) => {
            let found =
                convert_to_rid_list(&get_equivalent_features(conn, reference2, options).await?);
            if found.is_empty() {
                return Err(GraphKbError::FeatureNotFound(format!(
                    "unable to find the gene ({}) or any equivalent representations",
                    reference2
                )));
            }
            Some(found)
        }
        None => None,
    };

    let term_options = TermTreeOptions {
        ignore_cache: options.ignore_cache,
        ..Default::default()
    };
    let types: HashSet<String> = get_term_tree(conn, &parsed.variant_type, &term_options)
        .await?
        .into_iter()
        .map(|t| t.rid)
        .collect();
    if types.is_empty() {
        return Err(GraphKbError::InvalidInput(format!(
            "unable to find the term/type ({}) or any equivalent",
            parsed.variant_type
        )));
    }
    let mut type_list: Vec<&String> = types.iter().collect();
    type_list.sort();

    let mut filters = vec![json!({"reference1": features, "operator": "IN"})];
    match &secondary_features {
        Some(secondary) => filters.push(json!({"reference2": secondary, "operator": "IN"})),
        None => filters.push(json!({"reference2": null})),
    }
    if let Some(start) = &parsed.break1_start {
        filters.push(json!({"break1Start.@class": start.class}));
    }

    let candidates: Vec<Record> = query_as_with(
        conn,
        &json!({
            "target": "PositionalVariant",
            "filters": filters,
            "returnProperties": POS_VARIANT_RETURN_PROPERTIES,
        }),
        QueryOptions::ignore_cache(options.ignore_cache),
    )
    .await?;

    let mut filtered = Vec::new();
    for row in candidates {
        let type_matches = row
            .variant_type
            .as_ref()
            .is_none_or(|t| types.contains(t.rid()));
        if type_matches && compare_positional_variants(&parsed, &row)? {
            filtered.push(row);
        }
    }
    debug!(
        "{}: {} positional variants on {} features",
        variant_string,
        filtered.len(),
        features.len()
    );

    let mut category_filters = vec![
        json!({"reference1": features, "operator": "IN"}),
        json!({"type": type_list, "operator": "IN"}),
    ];
    match &secondary_features {
        Some(secondary) => category_filters.push(json!({"reference2": secondary, "operator": "IN"})),
        None => category_filters.push(json!({"reference2": null})),
    }

    let mut matches: Vec<Record> = query_as_with(
        conn,
        &json!({
            "target": {"target": "CategoryVariant", "filters": category_filters},
            "queryType": "similarTo",
            "edges": SIMILARITY_EDGES,
            "treeEdges": ["Infers"],
            "returnProperties": POS_VARIANT_RETURN_PROPERTIES,
        }),
        QueryOptions::ignore_cache(options.ignore_cache),
    )
    .await?;

    if !filtered.is_empty() {
        let similar: Vec<Record> = query_as_with(
            conn,
            &json!({
                "target": convert_to_rid_list(&filtered),
                "queryType": "similarTo",
                "edges": SIMILARITY_EDGES,
                "treeEdges": ["Infers"],
                "returnProperties": POS_VARIANT_RETURN_PROPERTIES,
            }),
            QueryOptions::ignore_cache(options.ignore_cache),
        )
        .await?;
        matches.extend(filtered);
        matches.extend(similar);
    }

    let mut seen = HashSet::new();
    matches.retain(|row| seen.insert(row.rid.clone()));
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(value: Option<i64>) -> Position {
        Position {
            class: "ProteinPosition".to_string(),
            pos: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_positions_overlap_exact() {
        assert!(positions_overlap(&pos(Some(12)), &pos(Some(12)), None).unwrap());
        assert!(!positions_overlap(&pos(Some(12)), &pos(Some(13)), None).unwrap());
    }

    #[test]
    fn test_positions_overlap_range() {
        let start = pos(Some(10));
        let end = pos(Some(20));
        assert!(positions_overlap(&pos(Some(15)), &start, Some(&end)).unwrap());
        assert!(!positions_overlap(&pos(Some(9)), &start, Some(&end)).unwrap());
        assert!(!positions_overlap(&pos(Some(21)), &start, Some(&end)).unwrap());
    }

    #[test]
    fn test_positions_overlap_unknown() {
        assert!(positions_overlap(&pos(None), &pos(Some(3)), None).unwrap());
        assert!(positions_overlap(&pos(Some(3)), &pos(None), None).unwrap());
    }

    #[test]
    fn test_positions_overlap_cytoband() {
        let cytoband = Position {
            class: "CytobandPosition".to_string(),
            ..Default::default()
        };
        let err = positions_overlap(&cytoband, &pos(Some(1)), None).unwrap_err();
        assert!(matches!(err, GraphKbError::NotImplemented(_)));
    }

    #[test]
    fn test_compare_ambiguous_sequences() {
        let parsed = ParsedVariant {
            break1_start: Some(pos(Some(12))),
            untemplated_seq: Some("D".to_string()),
            ref_seq: Some("G".to_string()),
            ..Default::default()
        };
        let mut reference = Record {
            break1_start: Some(pos(Some(12))),
            untemplated_seq: Some("X".to_string()),
            ref_seq: Some("g".to_string()),
            ..Default::default()
        };
        assert!(compare_positional_variants(&parsed, &reference).unwrap());

        reference.untemplated_seq = Some("V".to_string());
        assert!(!compare_positional_variants(&parsed, &reference).unwrap());

        reference.untemplated_seq = Some("XX".to_string());
        assert!(!compare_positional_variants(&parsed, &reference).unwrap());
    }

    #[test]
    fn test_compare_requires_second_break() {
        let parsed = ParsedVariant {
            break1_start: Some(pos(Some(1))),
            break2_start: Some(pos(Some(5))),
            ..Default::default()
        };
        let reference = Record {
            break1_start: Some(pos(Some(1))),
            ..Default::default()
        };
        assert!(!compare_positional_variants(&parsed, &reference).unwrap());
    }
}
