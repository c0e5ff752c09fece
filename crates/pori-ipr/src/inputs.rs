//! Reading and checking the variant input of a report
//!
//! Variant rows come from the report content JSON and from tab-delimited files.
//! Each section is normalized here: required columns are checked, the `variant`
//! string used for GraphKB matching is built and every row gets a unique `key`.

use std::{
    collections::{BTreeSet, HashSet},
    path::Path,
};

use jsonschema::{Draft, JSONSchema};
use pori_common::{
    CopyVariant, ExpressionVariant, FusionVariant, SmallMutation, variant_type,
};
use pori_graphkb::constants::{copy_category, expression_category};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::{
    error::{IprError, Result},
    util::hash_key,
};

const CONTENT_SCHEMA: &str = include_str!("../schema/content.spec.json");

const SMALL_MUTATION_REQUIRED: &[&str] = &["gene"];
const COPY_REQUIRED: &[&str] = &["gene"];
const EXPRESSION_REQUIRED: &[&str] = &["gene"];
const STRUCTURAL_REQUIRED: &[&str] = &["eventType", "breakpoint", "gene1", "gene2", "exon1", "exon2"];

const PRIMARY_SITE_COLUMNS: &[&str] = &[
    "primarySitekIQR",
    "primarySitePercentile",
    "primarySiteZScore",
    "primarySiteFoldChange",
];
const BIOPSY_SITE_COLUMNS: &[&str] = &[
    "biopsySitekIQR",
    "biopsySitePercentile",
    "biopsySiteZScore",
    "biopsySiteFoldChange",
];
const INTERNAL_PANCANCER_COLUMNS: &[&str] = &[
    "internalPancancerkIQR",
    "internalPancancerPercentile",
    "internalPancancerZScore",
    "internalPancancerFoldChange",
];

/// Read a tab-delimited file with a header row into JSON rows
///
/// Cells that look like integers, floats or booleans are coerced. Empty cells
/// become null.
pub fn load_variant_table(path: impl AsRef<Path>) -> Result<Vec<Value>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() > columns.len() {
            return Err(IprError::validation(format!(
                "{}: row {} has {} columns but the header has {}",
                path.display(),
                index + 2,
                cells.len(),
                columns.len()
            )));
        }
        let mut row = Map::new();
        for (i, column) in columns.iter().enumerate() {
            let cell = cells.get(i).copied().unwrap_or("");
            row.insert(column.to_string(), coerce_cell(cell));
        }
        rows.push(Value::Object(row));
    }
    debug!("loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn coerce_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match cell {
        "True" | "true" | "TRUE" => Value::Bool(true),
        "False" | "false" | "FALSE" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

fn check_required_columns(rows: &[Value], required: &[&str], section: &str) -> Result<()> {
    for (index, row) in rows.iter().enumerate() {
        let Some(row) = row.as_object() else {
            return Err(IprError::validation(format!(
                "{} row {} is not an object",
                section, index
            )));
        };
        let missing: Vec<&str> = required
            .iter()
            .filter(|column| !row.contains_key(**column))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(IprError::validation(format!(
                "missing required column(s) in {} input: {}",
                section,
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

fn check_unique_keys<'a>(keys: impl Iterator<Item = &'a str>, section: &str) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            duplicates.insert(key);
        }
    }
    if !duplicates.is_empty() {
        return Err(IprError::validation(format!(
            "duplicate keys are not allowed in {} input: {}",
            section,
            duplicates.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, section: &str) -> Result<Vec<T>> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            serde_json::from_value(row).map_err(|e| {
                IprError::validation(format!("{} row {}: {}", section, index, e))
            })
        })
        .collect()
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Normalize small mutation rows
pub fn preprocess_small_mutations(rows: Vec<Value>) -> Result<Vec<SmallMutation>> {
    check_required_columns(&rows, SMALL_MUTATION_REQUIRED, "small mutations")?;
    let mut mutations: Vec<SmallMutation> = parse_rows(rows, "small mutations")?;

    for row in &mut mutations {
        if row.gene.is_empty() {
            return Err(IprError::validation(
                "small mutations must have a gene".to_string(),
            ));
        }
        if row.hgvs_protein.is_none()
            && let Some(change) = &row.protein_change
        {
            row.hgvs_protein = Some(format!("{}:{}", row.gene, change));
        }

        row.variant = match &row.protein_change {
            Some(change) => format!("{}:{}", row.gene, change),
            None => [&row.hgvs_protein, &row.hgvs_cds, &row.hgvs_genomic]
                .into_iter()
                .find_map(|hgvs| hgvs.clone())
                .ok_or_else(|| {
                    IprError::validation(format!(
                        "small mutation on {} has no proteinChange or hgvs notation",
                        row.gene
                    ))
                })?,
        };
        row.variant_type = variant_type::SMALL_MUTATION.to_string();

        if row.end_position.is_none() {
            row.end_position = row.start_position;
        }

        if row.key.is_empty() {
            row.key = hash_key(&[
                text(&row.chromosome),
                number(row.start_position),
                number(row.end_position),
                row.gene.clone(),
                text(&row.protein_change),
                text(&row.hgvs_protein),
                text(&row.hgvs_cds),
                text(&row.hgvs_genomic),
                text(&row.ref_seq),
                text(&row.alt_seq),
            ]);
        }
    }

    check_unique_keys(mutations.iter().map(|m| m.key.as_str()), "small mutations")?;
    Ok(mutations)
}

/// Normalize copy number rows
pub fn preprocess_copy_variants(rows: Vec<Value>) -> Result<Vec<CopyVariant>> {
    check_required_columns(&rows, COPY_REQUIRED, "copy variants")?;
    let mut variants: Vec<CopyVariant> = parse_rows(rows, "copy variants")?;

    for row in &mut variants {
        if let Some(category) = &row.kb_category
            && !copy_category::ALL.contains(&category.as_str())
        {
            return Err(IprError::validation(format!(
                "invalid copy variant kbCategory ({}) on {}",
                category, row.gene
            )));
        }
        row.variant = text(&row.kb_category);
        row.variant_type = variant_type::COPY.to_string();
        if row.key.is_empty() {
            row.key = row.gene.clone();
        }
    }

    check_unique_keys(variants.iter().map(|v| v.key.as_str()), "copy variants")?;
    Ok(variants)
}

/// Normalize expression outlier rows
pub fn preprocess_expression_variants(rows: Vec<Value>) -> Result<Vec<ExpressionVariant>> {
    check_required_columns(&rows, EXPRESSION_REQUIRED, "expression variants")?;
    let mut variants: Vec<ExpressionVariant> = parse_rows(rows, "expression variants")?;

    for row in &mut variants {
        if let Some(category) = &row.kb_category
            && !expression_category::ALL.contains(&category.as_str())
        {
            return Err(IprError::validation(format!(
                "invalid expression variant kbCategory ({}) on {}",
                category, row.gene
            )));
        }
        if let Some(image) = &row.histogram_image
            && !Path::new(image).exists()
        {
            return Err(IprError::validation(format!(
                "histogramImage for {} does not exist: {}",
                row.gene, image
            )));
        }
        row.variant = text(&row.kb_category);
        row.variant_type = variant_type::EXPRESSION.to_string();
        if row.key.is_empty() {
            row.key = row.gene.clone();
        }
    }

    check_unique_keys(variants.iter().map(|v| v.key.as_str()), "expression variants")?;
    Ok(variants)
}

/// GraphKB notation for a fusion, e.g. `(EML4,ALK):fusion(e.13,e.20)`
pub fn create_graphkb_sv_notation(row: &FusionVariant) -> Result<String> {
    let gene1 = row.gene1.as_deref().filter(|g| !g.is_empty());
    let gene2 = row.gene2.as_deref().filter(|g| !g.is_empty());
    let exon = |value: Option<i64>| value.map_or("?".to_string(), |e| e.to_string());

    let ((gene1, exon1), (gene2, exon2)) = match (gene1, gene2) {
        (None, None) => {
            return Err(IprError::validation(format!(
                "both genes cannot be blank for a structural variant ({})",
                row.key
            )));
        }
        (None, Some(gene)) => ((gene, exon(row.exon2)), ("?", exon(row.exon1))),
        (Some(first), second) => (
            (first, exon(row.exon1)),
            (second.unwrap_or("?"), exon(row.exon2)),
        ),
    };

    Ok(format!(
        "({},{}):fusion(e.{},e.{})",
        gene1, gene2, exon1, exon2
    ))
}

/// Normalize structural variant rows
pub fn preprocess_structural_variants(rows: Vec<Value>) -> Result<Vec<FusionVariant>> {
    check_required_columns(&rows, STRUCTURAL_REQUIRED, "structural variants")?;
    let mut variants: Vec<FusionVariant> = parse_rows(rows, "structural variants")?;

    for row in &mut variants {
        row.variant = create_graphkb_sv_notation(row)?;
        row.variant_type = variant_type::STRUCTURAL.to_string();
        if row.key.is_empty() {
            row.key = hash_key(&[
                text(&row.gene1),
                text(&row.gene2),
                number(row.exon1),
                number(row.exon2),
                text(&row.breakpoint),
                text(&row.event_type),
            ]);
        }
    }

    check_unique_keys(variants.iter().map(|v| v.key.as_str()), "structural variants")?;
    Ok(variants)
}

/// Genes carrying any variant
///
/// Genes whose mutations lack matching copy or expression data are logged.
pub fn check_variant_links(
    small_mutations: &[SmallMutation],
    expression_variants: &[ExpressionVariant],
    copy_variants: &[CopyVariant],
    structural_variants: &[FusionVariant],
) -> BTreeSet<String> {
    let copy_genes: HashSet<&str> = copy_variants.iter().map(|v| v.gene.as_str()).collect();
    let expression_genes: HashSet<&str> =
        expression_variants.iter().map(|v| v.gene.as_str()).collect();

    let mut genes_with_variants = BTreeSet::new();
    let mut missing_genes = BTreeSet::new();
    let mut missing_errors = BTreeSet::new();

    let mut check = |gene: &str, key: &str, kind: &str, check_copy: bool| {
        if !expression_genes.is_empty() && !expression_genes.contains(gene) {
            missing_genes.insert(gene.to_string());
            missing_errors.insert(format!(
                "missing expression data for {} ({}) gene ({})",
                kind, key, gene
            ));
        }
        if check_copy && !copy_genes.is_empty() && !copy_genes.contains(gene) {
            missing_genes.insert(gene.to_string());
            missing_errors.insert(format!(
                "missing copy number data for {} ({}) gene ({})",
                kind, key, gene
            ));
        }
    };

    for variant in small_mutations.iter().filter(|v| !v.gene.is_empty()) {
        check(&variant.gene, &variant.key, "mutation", true);
        genes_with_variants.insert(variant.gene.clone());
    }

    for variant in copy_variants.iter().filter(|v| v.kb_category.is_some()) {
        check(&variant.gene, &variant.key, "copy variant", false);
        genes_with_variants.insert(variant.gene.clone());
    }

    for variant in expression_variants.iter().filter(|v| v.kb_category.is_some()) {
        genes_with_variants.insert(variant.gene.clone());
    }

    for variant in structural_variants {
        for gene in [&variant.gene1, &variant.gene2].into_iter().flatten() {
            if gene.is_empty() {
                continue;
            }
            check(gene, &variant.key, "structural variant", true);
            genes_with_variants.insert(gene.clone());
        }
    }

    if !missing_genes.is_empty() {
        for message in &missing_errors {
            debug!("{}", message);
        }
        warn!(
            "Missing information variant links on {} genes",
            missing_genes.len()
        );
    }
    genes_with_variants
}

fn all_blank(row: &Map<String, Value>, columns: &[&str]) -> bool {
    columns.iter().all(|column| match row.get(*column) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    })
}

/// Comparators required by the images and expression data must be defined
pub fn check_comparators(content: &Value, expression_variants: &[ExpressionVariant]) -> Result<()> {
    let comparator_roles: HashSet<&str> = content
        .get("comparators")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("analysisRole").and_then(Value::as_str))
        .collect();

    let images = content.get("images").and_then(Value::as_array);
    for key in images
        .into_iter()
        .flatten()
        .filter_map(|image| image.get("key").and_then(Value::as_str))
        .filter(|key| key.starts_with("mutationBurden."))
    {
        let comparator_type = key.rsplit('.').next().unwrap_or_default();
        let role = format!("mutation burden ({})", comparator_type);
        if comparator_roles.contains(role.as_str()) {
            continue;
        }
        if key.contains("_sv.")
            && comparator_roles.contains(format!("mutation burden SV ({})", comparator_type).as_str())
        {
            continue;
        }
        return Err(IprError::validation(format!(
            "missing required comparator definition ({})",
            role
        )));
    }

    if !expression_variants.is_empty() {
        let mut required = BTreeSet::from(["expression (disease)"]);
        for variant in expression_variants {
            if !all_blank(&variant.extra, PRIMARY_SITE_COLUMNS) {
                required.insert("expression (primary site)");
            }
            if !all_blank(&variant.extra, BIOPSY_SITE_COLUMNS) {
                required.insert("expression (biopsy site)");
            }
            if !all_blank(&variant.extra, INTERNAL_PANCANCER_COLUMNS) {
                required.insert("expression (internal pancancer cohort)");
            }
        }
        let missing: Vec<&str> = required
            .into_iter()
            .filter(|role| !comparator_roles.contains(role))
            .collect();
        if !missing.is_empty() {
            return Err(IprError::validation(format!(
                "missing required comparator definitions ({})",
                missing.join("; ")
            )));
        }
    }

    let mut burden_roles = HashSet::new();
    for role in content
        .get("mutationBurden")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| row.get("role").and_then(Value::as_str))
    {
        if !burden_roles.insert(role) {
            return Err(IprError::validation(format!(
                "mutation burden roles must be unique ({})",
                role
            )));
        }
    }
    Ok(())
}

/// The packaged report content JSON schema
pub fn content_schema() -> Result<Value> {
    Ok(serde_json::from_str(CONTENT_SCHEMA)?)
}

/// Validate the report content, filling in top level defaults
pub fn validate_report_content(content: &mut Value) -> Result<()> {
    let schema = content_schema()?;

    if let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(Value::as_object),
        content.as_object_mut(),
    ) {
        for (name, property) in properties {
            if let Some(default) = property.get("default")
                && !object.contains_key(name)
            {
                object.insert(name.clone(), default.clone());
            }
        }
    }

    let validator = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| IprError::Schema(format!("invalid packaged schema: {}", e)))?;

    if let Err(errors) = validator.validate(content) {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        return Err(IprError::Schema(messages.join("; ")));
    }
    Ok(())
}
