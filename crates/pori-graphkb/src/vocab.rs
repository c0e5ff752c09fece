//! Ontology term trees
//!
//! GraphKB vocabularies are trees over `SubClassOf` edges. Most matching works
//! on the set of terms under a base term, sometimes widened with its
//! superclasses up to (not including) a root exclusion term.

use std::collections::{BTreeMap, HashSet};

use pori_common::{Record, convert_to_rid_list};
use serde_json::json;

use crate::{
    connection::{GraphKb, QueryOptions, from_rows, query_as_with},
    error::{GraphKbError, Result},
};

const TERM_RETURN_PROPERTIES: &[&str] = &["@rid", "@class", "name", "displayName", "deprecated"];

/// Options for [`get_term_tree`] and [`get_equivalent_terms`]
#[derive(Clone, Debug)]
pub struct TermTreeOptions<'a> {
    /// Superclasses of this term (and the term itself) are left out
    pub root_exclude_term: &'a str,
    pub ontology_class: &'a str,
    pub include_superclasses: bool,
    pub ignore_cache: bool,
}

impl Default for TermTreeOptions<'_> {
    fn default() -> Self {
        Self {
            root_exclude_term: "",
            ontology_class: "Vocabulary",
            include_superclasses: true,
            ignore_cache: false,
        }
    }
}

impl<'a> TermTreeOptions<'a> {
    pub fn for_class(ontology_class: &'a str) -> Self {
        Self {
            ontology_class,
            ..Default::default()
        }
    }

    pub fn excluding(root_exclude_term: &'a str) -> Self {
        Self {
            root_exclude_term,
            ..Default::default()
        }
    }
}

async fn base_term_rids(
    conn: &dyn GraphKb,
    ontology_class: &str,
    name: &str,
    ignore_cache: bool,
) -> Result<Vec<String>> {
    let records: Vec<Record> = query_as_with(
        conn,
        &json!({
            "target": {"target": ontology_class, "filters": {"name": name}},
            "queryType": "similarTo",
            "treeEdges": [],
            "returnProperties": ["@rid", "name"],
        }),
        QueryOptions::ignore_cache(ignore_cache),
    )
    .await?;
    Ok(convert_to_rid_list(&records))
}

async fn traverse(
    conn: &dyn GraphKb,
    rids: &[String],
    query_type: &str,
    ignore_cache: bool,
) -> Result<Vec<Record>> {
    if rids.is_empty() {
        return Ok(Vec::new());
    }
    query_as_with(
        conn,
        &json!({
            "target": rids,
            "queryType": query_type,
            "edges": ["SubClassOf"],
            "returnProperties": TERM_RETURN_PROPERTIES,
        }),
        QueryOptions::ignore_cache(ignore_cache),
    )
    .await
}

/// The term, its equivalents and its superclasses, minus the root exclusion
pub async fn get_equivalent_terms(
    conn: &dyn GraphKb,
    base_term_name: &str,
    options: &TermTreeOptions<'_>,
) -> Result<Vec<Record>> {
    let base = base_term_rids(
        conn,
        options.ontology_class,
        base_term_name,
        options.ignore_cache,
    )
    .await?;
    let parents = traverse(conn, &base, "ancestors", options.ignore_cache).await?;

    if options.root_exclude_term.is_empty() {
        return Ok(parents);
    }

    let root = base_term_rids(
        conn,
        options.ontology_class,
        options.root_exclude_term,
        options.ignore_cache,
    )
    .await?;
    let excluded: HashSet<String> = traverse(conn, &root, "ancestors", options.ignore_cache)
        .await?
        .into_iter()
        .map(|r| r.rid)
        .collect();

    Ok(parents
        .into_iter()
        .filter(|term| !excluded.contains(&term.rid))
        .collect())
}

/// The term and all of its subclasses, plus superclasses when requested
pub async fn get_term_tree(
    conn: &dyn GraphKb,
    base_term_name: &str,
    options: &TermTreeOptions<'_>,
) -> Result<Vec<Record>> {
    let base = base_term_rids(
        conn,
        options.ontology_class,
        base_term_name,
        options.ignore_cache,
    )
    .await?;
    let children = traverse(conn, &base, "descendants", options.ignore_cache).await?;

    let parents = if options.include_superclasses {
        get_equivalent_terms(conn, base_term_name, options).await?
    } else {
        Vec::new()
    };

    // merge by rid, keeping a stable order
    let mut terms: BTreeMap<String, Record> = BTreeMap::new();
    let mut order = Vec::new();
    for term in children.into_iter().chain(parents) {
        if !terms.contains_key(&term.rid) {
            order.push(term.rid.clone());
        }
        terms.insert(term.rid.clone(), term);
    }
    Ok(order
        .into_iter()
        .filter_map(|rid| terms.remove(&rid))
        .collect())
}

/// Rids of every term under any of the base terms (superclasses excluded)
pub async fn get_terms_set(
    conn: &dyn GraphKb,
    base_terms: &[&str],
    ignore_cache: bool,
) -> Result<HashSet<String>> {
    let options = TermTreeOptions {
        include_superclasses: false,
        ignore_cache,
        ..Default::default()
    };
    let mut terms = HashSet::new();
    for base_term in base_terms {
        for term in get_term_tree(conn, base_term, &options).await? {
            terms.insert(term.rid);
        }
    }
    Ok(terms)
}

/// The single, non-deprecated term with the given name
pub async fn get_term_by_name(
    conn: &dyn GraphKb,
    name: &str,
    ontology_class: &str,
) -> Result<Record> {
    let rows = conn
        .query(&json!({
            "target": ontology_class,
            "filters": {"AND": [{"name": name}, {"deprecated": false}]},
        }))
        .await?;
    if rows.len() != 1 {
        return Err(GraphKbError::RecordCount {
            expected: 1,
            found: rows.len(),
            context: format!("{} named {}", ontology_class, name),
        });
    }
    let mut records: Vec<Record> = from_rows(rows)?;
    Ok(records.remove(0))
}
