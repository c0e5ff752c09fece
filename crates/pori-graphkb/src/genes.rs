//! Gene lists and gene level flags
//!
//! The report flags genes that are oncogenes, tumour suppressors, on a cancer
//! gene panel, or referenced by knowledge base statements. The lists come from
//! statements of specific sources and relevances.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use pori_common::{IprGene, Link, Record, Statement};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    connection::{GraphKb, QueryOptions, query_as, query_as_with},
    constants::{
        BASE_THERAPEUTIC_TERMS, CANCER_GENE, FAILED_REVIEW_STATUS, GENE_RETURN_PROPERTIES,
        ONCOGENE, ONCOKB_SOURCE_NAME, PHARMACOGENOMIC_SOURCE_EXCLUDE_LIST,
        PREFERRED_GENE_SOURCE, RELEVANCE_BASE_TERMS, TSO500_SOURCE_NAME, TUMOUR_SUPPRESSIVE,
        prefixed,
    },
    error::Result,
    matching::{FeatureOptions, get_equivalent_features},
    util::ontology_preference_key,
    vocab::get_terms_set,
};

fn is_gene(record: &Record) -> bool {
    record.biotype.as_deref() == Some("gene")
}

fn dedup_by_rid(records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.rid.clone()))
        .collect()
}

/// Gene subjects of statements from `sources` with the given relevance
async fn get_tumourigenesis_genes_list(
    conn: &dyn GraphKb,
    relevance: &str,
    sources: &[&str],
    ignore_cache: bool,
) -> Result<Vec<Record>> {
    let statements: Vec<Statement> = query_as_with(
        conn,
        &json!({
            "target": "Statement",
            "filters": {"AND": [
                {"source": {"target": "Source", "filters": {"name": sources, "operator": "IN"}}},
                {"relevance": {"target": "Vocabulary", "filters": {"name": relevance}}},
            ]},
            "returnProperties": prefixed("subject", GENE_RETURN_PROPERTIES),
        }),
        QueryOptions::ignore_cache(ignore_cache),
    )
    .await?;

    Ok(dedup_by_rid(
        statements
            .into_iter()
            .filter_map(|s| s.subject)
            .filter(is_gene),
    ))
}

/// Genes OncoKB calls oncogenic
pub async fn get_oncokb_oncogenes(conn: &dyn GraphKb) -> Result<Vec<Record>> {
    get_tumourigenesis_genes_list(conn, ONCOGENE, &[ONCOKB_SOURCE_NAME], false).await
}

/// Genes OncoKB calls tumour suppressive
pub async fn get_oncokb_tumour_supressors(conn: &dyn GraphKb) -> Result<Vec<Record>> {
    get_tumourigenesis_genes_list(conn, TUMOUR_SUPPRESSIVE, &[ONCOKB_SOURCE_NAME], false).await
}

/// Genes on the TSO500 cancer gene list
pub async fn get_cancer_genes(conn: &dyn GraphKb) -> Result<Vec<Record>> {
    get_tumourigenesis_genes_list(conn, CANCER_GENE, &[TSO500_SOURCE_NAME], false).await
}

fn condition_genes(condition: &Record) -> Vec<Record> {
    if condition.class == "Feature" {
        return vec![condition.clone()];
    }
    if !condition.class.ends_with("Variant") {
        return Vec::new();
    }
    [&condition.reference1, &condition.reference2]
        .into_iter()
        .flatten()
        .filter_map(Link::record)
        .filter(|r| is_gene(r))
        .cloned()
        .collect()
}

/// Genes named in the conditions of therapeutic statements
pub async fn get_therapeutic_associated_genes(conn: &dyn GraphKb) -> Result<Vec<Record>> {
    let relevance: BTreeSet<String> = get_terms_set(conn, BASE_THERAPEUTIC_TERMS, false)
        .await?
        .into_iter()
        .collect();
    if relevance.is_empty() {
        return Ok(Vec::new());
    }

    let mut return_properties = vec!["reviewStatus".to_string()];
    return_properties.extend(prefixed("conditions", GENE_RETURN_PROPERTIES));
    for reference in ["reference1", "reference2"] {
        return_properties.extend(prefixed(
            &format!("conditions.{}", reference),
            GENE_RETURN_PROPERTIES,
        ));
    }

    let statements: Vec<Statement> = query_as(
        conn,
        &json!({
            "target": "Statement",
            "filters": {"relevance": relevance, "operator": "IN"},
            "returnProperties": return_properties,
        }),
    )
    .await?;

    Ok(dedup_by_rid(
        statements
            .iter()
            .filter(|s| s.review_status.as_deref() != Some(FAILED_REVIEW_STATUS))
            .flat_map(|s| s.conditions.iter().flat_map(condition_genes)),
    ))
}

/// Gene features referenced by variants of the given types
pub async fn get_genes_from_variant_types(
    conn: &dyn GraphKb,
    types: &[&str],
    source_record_ids: &[String],
    ignore_cache: bool,
) -> Result<Vec<Record>> {
    let mut variant_filters = Vec::new();
    if !types.is_empty() {
        variant_filters.push(json!({
            "type": {"target": "Vocabulary", "filters": {"name": types, "operator": "IN"}},
        }));
    }
    let variants: Vec<Record> = query_as_with(
        conn,
        &json!({
            "target": "Variant",
            "filters": variant_filters,
            "returnProperties": ["reference1", "reference2"],
        }),
        QueryOptions::ignore_cache(ignore_cache),
    )
    .await?;

    let genes: BTreeSet<String> = variants
        .iter()
        .flat_map(|v| [&v.reference1, &v.reference2])
        .flatten()
        .map(|link| link.rid().to_string())
        .collect();
    if genes.is_empty() {
        return Ok(Vec::new());
    }

    let mut gene_filters = vec![json!({"biotype": "gene"})];
    if !source_record_ids.is_empty() {
        gene_filters.push(json!({"source": source_record_ids, "operator": "IN"}));
    }
    query_as_with(
        conn,
        &json!({
            "target": genes,
            "filters": gene_filters,
            "returnProperties": GENE_RETURN_PROPERTIES,
        }),
        QueryOptions::ignore_cache(ignore_cache),
    )
    .await
}

/// Display name of the preferred gene record for a gene name or rid
///
/// Returns an empty string when no gene record is found.
pub async fn get_preferred_gene_name(
    conn: &dyn GraphKb,
    gene_name: &str,
    source: &str,
    ignore_cache: bool,
) -> Result<String> {
    let source = if source.is_empty() {
        PREFERRED_GENE_SOURCE
    } else {
        source
    };
    let options = FeatureOptions {
        ignore_cache,
        ..Default::default()
    };
    let genes: Vec<Record> = get_equivalent_features(conn, gene_name, &options)
        .await?
        .into_iter()
        .filter(|r| is_gene(r) && !r.deprecated)
        .collect();

    if genes.is_empty() {
        error!("No {} found for {}", source, gene_name);
        return Ok(String::new());
    }

    let preferred: Vec<&Record> = genes
        .iter()
        .filter(|g| g.source_name() == Some(source))
        .collect();
    let candidates: Vec<&Record> = if preferred.is_empty() {
        warn!("No {} gene for {}, using another source", source, gene_name);
        genes.iter().collect()
    } else {
        preferred
    };

    let sources_sort = HashMap::new();
    Ok(candidates
        .into_iter()
        .min_by_key(|g| ontology_preference_key(g, &sources_sort))
        .map(|g| g.display().to_string())
        .unwrap_or_default())
}

/// Genes and variants with a given relevance, as found in statement conditions
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelevantVariants {
    /// Sorted gene display names
    pub genes: Vec<String>,
    /// Variant rid to display name
    pub variants: BTreeMap<String, String>,
}

async fn get_relevance_variant_info(
    conn: &dyn GraphKb,
    category: &str,
    excluded_sources: &[&str],
) -> Result<RelevantVariants> {
    let base_terms = RELEVANCE_BASE_TERMS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, terms)| *terms)
        .unwrap_or(&[]);
    let relevance: BTreeSet<String> = get_terms_set(conn, base_terms, false)
        .await?
        .into_iter()
        .collect();
    if relevance.is_empty() {
        return Ok(RelevantVariants::default());
    }

    let statements: Vec<Statement> = query_as(
        conn,
        &json!({
            "target": "Statement",
            "filters": {"relevance": relevance, "operator": "IN"},
            "returnProperties": [
                "conditions.@class",
                "conditions.@rid",
                "conditions.displayName",
                "conditions.reference1.biotype",
                "conditions.reference1.displayName",
                "conditions.reference2.biotype",
                "conditions.reference2.displayName",
                "source.name",
                "reviewStatus",
            ],
        }),
    )
    .await?;

    let mut genes = BTreeSet::new();
    let mut variants = BTreeMap::new();
    for statement in &statements {
        if excluded_sources.contains(&statement.source_name())
            || statement.review_status.as_deref() == Some(FAILED_REVIEW_STATUS)
        {
            continue;
        }
        for condition in &statement.conditions {
            if condition.reference1.is_none() {
                continue;
            }
            variants.insert(condition.rid.clone(), condition.display().to_string());
            for reference in [&condition.reference1, &condition.reference2]
                .into_iter()
                .flatten()
                .filter_map(Link::record)
            {
                if is_gene(reference) {
                    genes.insert(reference.display().to_string());
                }
            }
        }
    }

    Ok(RelevantVariants {
        genes: genes.into_iter().collect(),
        variants,
    })
}

/// Genes and variants with cancer predisposition relevance
pub async fn get_cancer_predisposition_info(conn: &dyn GraphKb) -> Result<RelevantVariants> {
    get_relevance_variant_info(conn, "cancer predisposition", &[]).await
}

/// Genes and variants with pharmacogenomic relevance
pub async fn get_pharmacogenomic_info(conn: &dyn GraphKb) -> Result<RelevantVariants> {
    get_relevance_variant_info(conn, "pharmacogenomic", PHARMACOGENOMIC_SOURCE_EXCLUDE_LIST).await
}

fn rid_set(records: &[Record]) -> HashSet<String> {
    records.iter().map(|r| r.rid.clone()).collect()
}

/// Gene flags for the report, only genes with at least one flag are returned
pub async fn get_gene_information<S: AsRef<str>>(
    conn: &dyn GraphKb,
    gene_names: &[S],
) -> Result<Vec<IprGene>> {
    let gene_names: BTreeSet<&str> = gene_names.iter().map(AsRef::as_ref).collect();

    info!("fetching variant related genes list");
    let statements: Vec<Statement> = query_as(
        conn,
        &json!({
            "target": "Statement",
            "returnProperties": [
                "reviewStatus",
                "conditions.@rid",
                "conditions.@class",
                "conditions.reference1.@rid",
                "conditions.reference1.biotype",
                "conditions.reference2.@rid",
                "conditions.reference2.biotype",
            ],
        }),
    )
    .await?;

    let mut statement_related = HashSet::new();
    let mut fusion_partners = HashSet::new();
    let mut small_mutations = HashSet::new();
    for statement in statements
        .iter()
        .filter(|s| s.review_status.as_deref() != Some(FAILED_REVIEW_STATUS))
    {
        for condition in &statement.conditions {
            if condition.reference1.is_none() {
                continue;
            }
            let is_fusion = condition.reference2.is_some();
            let is_positional = condition.class == "PositionalVariant";
            for reference in [&condition.reference1, &condition.reference2]
                .into_iter()
                .flatten()
            {
                if reference.record().is_some_and(|r| !is_gene(r)) {
                    continue;
                }
                let rid = reference.rid().to_string();
                statement_related.insert(rid.clone());
                if is_fusion {
                    fusion_partners.insert(rid.clone());
                }
                if is_positional {
                    small_mutations.insert(rid);
                }
            }
        }
    }

    info!("fetching oncogenes list");
    let oncogenes = rid_set(&get_oncokb_oncogenes(conn).await?);
    info!("fetching tumour supressors list");
    let tumour_suppressors = rid_set(&get_oncokb_tumour_supressors(conn).await?);
    info!("fetching cancer gene list");
    let cancer_genes = rid_set(&get_cancer_genes(conn).await?);
    info!("fetching therapeutic associated genes lists");
    let therapeutic = rid_set(&get_therapeutic_associated_genes(conn).await?);

    info!("Setting gene_info flags on {} genes", gene_names.len());
    let mut result = Vec::new();
    for gene_name in gene_names {
        let equivalent =
            rid_set(&get_equivalent_features(conn, gene_name, &FeatureOptions::default()).await?);
        let flag = |set: &HashSet<String>| {
            (!equivalent.is_disjoint(set)).then_some(true)
        };

        let gene = IprGene {
            name: gene_name.to_string(),
            kb_statement_related: flag(&statement_related),
            known_fusion_partner: flag(&fusion_partners),
            known_small_mutation: flag(&small_mutations),
            tumour_suppressor: flag(&tumour_suppressors),
            oncogene: flag(&oncogenes),
            therapeutic_associated: flag(&therapeutic),
            cancer_gene_list_match: flag(&cancer_genes),
        };
        if gene.has_flag() {
            result.push(gene);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGraphKb, query_class};
    use serde_json::Value;

    fn gene(rid: &str, name: &str) -> Value {
        json!({"@rid": rid, "@class": "Feature", "biotype": "gene", "displayName": name, "name": name.to_lowercase()})
    }

    fn relevance_filter(body: &Value) -> Option<&str> {
        body.pointer("/filters/AND/1/relevance/filters/name")
            .and_then(Value::as_str)
    }

    fn gene_kb() -> MockGraphKb {
        MockGraphKb::new()
            .on_query(|body| {
                (query_class(body) == Some("Statement") && relevance_filter(body) == Some(ONCOGENE))
                    .then(|| {
                        vec![
                            json!({"subject": gene("#10:1", "KRAS")}),
                            json!({"subject": gene("#10:1", "KRAS")}),
                            json!({"subject": {"@rid": "#11:1", "biotype": "protein"}}),
                        ]
                    })
            })
            .on_query(|body| {
                (query_class(body) == Some("Statement")
                    && relevance_filter(body) == Some(TUMOUR_SUPPRESSIVE))
                .then(|| vec![json!({"subject": gene("#10:2", "TP53")})])
            })
            .on_query(|body| {
                (query_class(body) == Some("Statement") && body.get("filters").is_none()).then(|| {
                    vec![json!({
                        "reviewStatus": "passed",
                        "conditions": [{
                            "@rid": "#20:1",
                            "@class": "PositionalVariant",
                            "reference1": {"@rid": "#10:1", "biotype": "gene"},
                        }],
                    })]
                })
            })
            .on_query(|body| {
                let name = body.pointer("/target/filters/0/OR/1/name")?.as_str()?;
                match name {
                    "KRAS" => Some(vec![gene("#10:1", "KRAS")]),
                    "TP53" => Some(vec![gene("#10:2", "TP53")]),
                    "ACTB" => Some(vec![gene("#10:3", "ACTB")]),
                    _ => None,
                }
            })
    }

    #[tokio::test]
    async fn test_oncogenes_are_unique_genes() {
        let conn = gene_kb();
        let genes = get_oncokb_oncogenes(&conn).await.unwrap();
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].display(), "KRAS");
    }

    #[tokio::test]
    async fn test_gene_information_only_flagged() {
        let conn = gene_kb();
        let genes = get_gene_information(&conn, &["KRAS", "TP53", "ACTB"]).await.unwrap();

        let names: Vec<&str> = genes.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["KRAS", "TP53"]);

        let kras = &genes[0];
        assert_eq!(kras.oncogene, Some(true));
        assert_eq!(kras.kb_statement_related, Some(true));
        assert_eq!(kras.known_small_mutation, Some(true));
        assert_eq!(kras.known_fusion_partner, None);
        assert_eq!(kras.tumour_suppressor, None);

        assert_eq!(genes[1].tumour_suppressor, Some(true));
    }

    #[tokio::test]
    async fn test_preferred_gene_name() {
        let conn = MockGraphKb::new().on_query(|body| {
            (body.get("target") == Some(&json!(["#10:1"]))).then(|| {
                vec![
                    json!({"@rid": "#10:9", "biotype": "gene", "displayName": "KRAS-old", "name": "kras", "sourceId": "3845", "deprecated": true, "source": {"@rid": "#1:1", "name": "entrez gene"}}),
                    json!({"@rid": "#10:5", "biotype": "gene", "displayName": "ENSG00000133703", "name": "ensg00000133703", "sourceId": "ensg00000133703", "source": {"@rid": "#1:2", "name": "ensembl"}}),
                    json!({"@rid": "#10:1", "biotype": "gene", "displayName": "KRAS", "name": "kras", "sourceId": "3845", "source": {"@rid": "#1:1", "name": "entrez gene"}}),
                ]
            })
        });

        let name = get_preferred_gene_name(&conn, "#10:1", "", false).await.unwrap();
        assert_eq!(name, "KRAS");

        let missing = get_preferred_gene_name(&conn, "#99:1", "", false).await.unwrap();
        assert_eq!(missing, "");
    }

    #[tokio::test]
    async fn test_pharmacogenomic_info_skips_excluded_sources() {
        let conn = MockGraphKb::new()
            .with_term_tree("Vocabulary", &[("decreased toxicity", "toxicity")])
            .on_query(|body| {
                (query_class(body) == Some("Statement")).then(|| {
                    vec![
                        json!({
                            "source": {"name": "pharmgkb"},
                            "conditions": [{
                                "@rid": "#30:1",
                                "@class": "PositionalVariant",
                                "displayName": "DPYD:c.1905+1G>A",
                                "reference1": {"biotype": "gene", "displayName": "DPYD"},
                            }],
                        }),
                        json!({
                            "source": {"name": "civic"},
                            "conditions": [{
                                "@rid": "#30:2",
                                "@class": "PositionalVariant",
                                "displayName": "TPMT:p.A154T",
                                "reference1": {"biotype": "gene", "displayName": "TPMT"},
                            }],
                        }),
                    ]
                })
            });

        let info = get_pharmacogenomic_info(&conn).await.unwrap();
        assert_eq!(info.genes, vec!["DPYD".to_string()]);
        assert_eq!(info.variants.len(), 1);
        assert_eq!(info.variants["#30:1"], "DPYD:c.1905+1G>A");
    }
}
