//! Annotating variant rows with GraphKB statements
//!
//! Each annotator matches its variant rows to GraphKB variant records, pulls the
//! statements on those records and converts them to kbMatches rows pointing
//! back at the input row by `key`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use indicatif::{ProgressBar, ProgressStyle};
use pori_common::{
    CopyVariant, ExpressionVariant, IprVariant, KbMatch, Record, Statement, variant_type,
};
use pori_graphkb::{
    FeatureOptions, GraphKb, GraphKbError, ReferenceClass, from_rows,
    matching::{
        match_category_variant, match_copy_variant, match_expression_variant,
        match_positional_variant,
    },
    statement::get_statements_from_variants,
};
use regex::Regex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{MSI_DEFAULT_CATEGORY, REPORTED_COPY_VARIANTS, TMB_HIGH_CATEGORY},
    error::Result,
    report::convert_statements_to_alterations,
    util::convert_to_rid_set,
};

// deletion written as a substitution with nothing, e.g. chr1:g.150951027T>
static MALFORMED_DELETION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"g\..*\d[A-Za-z]>$").ok());

fn progress_bar(len: usize, show_progress: bool) -> ProgressBar {
    if !show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

/// Errors from a single variant that are logged instead of ending the run
fn is_match_failure(err: &GraphKbError) -> bool {
    matches!(
        err,
        GraphKbError::InvalidInput(_)
            | GraphKbError::NotImplemented(_)
            | GraphKbError::Status { .. }
            | GraphKbError::RecordCount { .. }
    )
}

/// Category variants built from the subjects of already matched statements
async fn get_second_pass_variants(
    conn: &dyn GraphKb,
    statements: &[Statement],
) -> Result<Vec<Record>> {
    let inferred: BTreeSet<(String, String)> = statements
        .iter()
        .filter_map(|s| {
            let subject = s.subject.as_ref()?;
            let relevance = s.relevance.name.as_deref()?;
            matches!(subject.class.as_str(), "Feature" | "Signature")
                .then(|| (subject.rid.clone(), relevance.to_string()))
        })
        .collect();

    let mut variants: HashMap<String, Record> = HashMap::new();
    let mut order = Vec::new();
    for (reference1, relevance) in &inferred {
        let matched = match match_category_variant(
            conn,
            reference1,
            relevance,
            "",
            ReferenceClass::Feature,
            &FeatureOptions::default(),
        )
        .await
        {
            Ok(matched) => matched,
            Err(err @ (GraphKbError::InvalidInput(_) | GraphKbError::FeatureNotFound(_))) => {
                debug!("no inferred variants for {} {}: {}", reference1, relevance, err);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        for variant in matched {
            if !variants.contains_key(&variant.rid) {
                order.push(variant.rid.clone());
            }
            variants.insert(variant.rid.clone(), variant);
        }
    }
    Ok(order
        .into_iter()
        .filter_map(|rid| variants.remove(&rid))
        .collect())
}

/// kbMatches for the statements on the matched variants
///
/// A second pass matches category variants inferred from the statement
/// subjects of the first pass. Its rows are flagged `kbData.inferred` and never
/// repeat a first-pass statement.
pub async fn get_ipr_statements_from_variants(
    conn: &dyn GraphKb,
    matches: &[Record],
    disease_name: &str,
) -> Result<Vec<KbMatch>> {
    if matches.is_empty() {
        return Ok(Vec::new());
    }

    let statements = get_statements_from_variants(conn, matches, false).await?;
    let existing: HashSet<&str> = statements.iter().map(|s| s.rid.as_str()).collect();

    let mut rows = convert_statements_to_alterations(
        conn,
        &statements,
        disease_name,
        &convert_to_rid_set(matches),
    )
    .await?;

    let inferred_matches = get_second_pass_variants(conn, &statements).await?;
    let inferred_statements: Vec<Statement> =
        get_statements_from_variants(conn, &inferred_matches, false)
            .await?
            .into_iter()
            .filter(|s| !existing.contains(s.rid.as_str()))
            .collect();

    let inferred_rows = convert_statements_to_alterations(
        conn,
        &inferred_statements,
        disease_name,
        &convert_to_rid_set(&inferred_matches),
    )
    .await?;
    rows.extend(inferred_rows.into_iter().map(|mut row| {
        row.kb_data.inferred = true;
        row
    }));
    Ok(rows)
}

fn tag_rows(rows: Vec<KbMatch>, key: &str, variant_type: &str) -> impl Iterator<Item = KbMatch> {
    rows.into_iter().map(move |mut row| {
        row.variant = key.to_string();
        row.variant_type = variant_type.to_string();
        row
    })
}

/// Annotate expression outliers
pub async fn annotate_expression_variants(
    conn: &dyn GraphKb,
    variants: &[ExpressionVariant],
    disease_name: &str,
    show_progress: bool,
) -> Result<Vec<KbMatch>> {
    let mut skipped = 0;
    let mut alterations = Vec::new();
    let mut problem_genes = BTreeSet::new();
    info!(
        "Starting annotation of {} expression category_variants",
        variants.len()
    );

    let pb = progress_bar(variants.len(), show_progress);
    for row in variants {
        pb.inc(1);
        if row.variant.is_empty() {
            skipped += 1;
            debug!("Skipping malformed Expression {}: {}", row.gene, row.key);
            continue;
        }
        let result = match_expression_variant(
            conn,
            &row.gene,
            &row.variant,
            &FeatureOptions::default(),
        )
        .await;
        match result {
            Ok(matches) => {
                let rows = get_ipr_statements_from_variants(conn, &matches, disease_name).await?;
                alterations.extend(tag_rows(rows, &row.key, variant_type::EXPRESSION));
            }
            Err(GraphKbError::FeatureNotFound(err)) => {
                debug!("Unrecognized gene ({} {}): {}", row.gene, row.variant, err);
                problem_genes.insert(row.gene.clone());
            }
            Err(err) if is_match_failure(&err) => {
                error!("failed to match variants ({} {}): {}", row.gene, row.variant, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    pb.finish_and_clear();

    if skipped > 0 {
        info!("skipped matching {} expression information rows", skipped);
    }
    if !problem_genes.is_empty() {
        error!("gene finding failures for expression {:?}", problem_genes);
        error!(
            "gene finding failure for {} expression genes",
            problem_genes.len()
        );
    }
    info!(
        "matched {} expression variants to {} graphkb annotations",
        variants.len(),
        alterations.len()
    );
    Ok(alterations)
}

/// Annotate copy number calls; only amplifications and deep deletions are matched
pub async fn annotate_copy_variants(
    conn: &dyn GraphKb,
    variants: &[CopyVariant],
    disease_name: &str,
    show_progress: bool,
) -> Result<Vec<KbMatch>> {
    let mut skipped = 0;
    let mut alterations = Vec::new();
    let mut problem_genes = BTreeSet::new();
    info!(
        "Starting annotation of {} copy category_variants",
        variants.len()
    );

    let pb = progress_bar(variants.len(), show_progress);
    for row in variants {
        pb.inc(1);
        if !REPORTED_COPY_VARIANTS.contains(&row.variant.as_str()) {
            skipped += 1;
            debug!(
                "Dropping {} copy change '{}' - not in REPORTED_COPY_VARIANTS",
                row.gene, row.variant
            );
            continue;
        }
        let result = match_copy_variant(
            conn,
            &row.gene,
            &row.variant,
            false,
            &FeatureOptions::default(),
        )
        .await;
        match result {
            Ok(matches) => {
                let rows = get_ipr_statements_from_variants(conn, &matches, disease_name).await?;
                alterations.extend(tag_rows(rows, &row.key, variant_type::COPY));
            }
            Err(GraphKbError::FeatureNotFound(err)) => {
                debug!("Unrecognized gene ({} {}): {}", row.gene, row.variant, err);
                problem_genes.insert(row.gene.clone());
            }
            Err(err) if is_match_failure(&err) => {
                error!("failed to match variants ({} {}): {}", row.gene, row.variant, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    pb.finish_and_clear();

    if skipped > 0 {
        info!(
            "skipped matching {} copy number variants not in {:?}",
            skipped, REPORTED_COPY_VARIANTS
        );
    }
    if !problem_genes.is_empty() {
        error!("gene finding failures for copy variants {:?}", problem_genes);
        error!(
            "gene finding failure for {} copy variant genes",
            problem_genes.len()
        );
    }
    info!(
        "matched {} copy category variants to {} graphkb annotations",
        variants.len(),
        alterations.len()
    );
    Ok(alterations)
}

fn positional_notations(row: &IprVariant) -> Vec<&str> {
    let (protein, cds, genomic) = match row {
        IprVariant::SmallMutation(v) => (&v.hgvs_protein, &v.hgvs_cds, &v.hgvs_genomic),
        IprVariant::Fusion(v) => (&v.hgvs_protein, &v.hgvs_cds, &v.hgvs_genomic),
        _ => return Vec::new(),
    };
    std::iter::once(row.variant())
        .chain([protein, cds, genomic].into_iter().filter_map(|v| v.as_deref()))
        .filter(|v| !v.is_empty())
        .collect()
}

/// `chr1:g.150951027T>` becomes `chr1:g.150951027del`
fn repair_malformed_deletion(variant: &str) -> Option<String> {
    let pattern = MALFORMED_DELETION.as_ref()?;
    if !pattern.is_match(variant) {
        return None;
    }
    let mut chars: Vec<char> = variant.chars().collect();
    chars.truncate(chars.len().saturating_sub(2));
    Some(format!("{}del", chars.into_iter().collect::<String>()))
}

async fn match_notation(conn: &dyn GraphKb, variant: &str) -> pori_graphkb::Result<Vec<Record>> {
    let options = FeatureOptions::default();
    match match_positional_variant(conn, variant, &options).await {
        Err(err @ GraphKbError::Status { .. }) => match repair_malformed_deletion(variant) {
            Some(repaired) => {
                warn!(
                    "Assuming malformed deletion variant {} is {}",
                    variant, repaired
                );
                match_positional_variant(conn, &repaired, &options).await
            }
            None => Err(err),
        },
        result => result,
    }
}

/// Annotate small mutations and fusions
///
/// Every notation of the row (`variant`, `hgvsProtein`, `hgvsCds`,
/// `hgvsGenomic`) is tried. Structural variants with a single gene are skipped.
pub async fn annotate_positional_variants(
    conn: &dyn GraphKb,
    variants: &[IprVariant],
    disease_name: &str,
    show_progress: bool,
) -> Result<Vec<KbMatch>> {
    let mut errors = 0;
    let mut alterations = Vec::new();
    let mut problem_genes = BTreeSet::new();

    let pb = progress_bar(variants.len(), show_progress);
    for row in variants {
        pb.inc(1);
        let (single_gene, fusion_genes) = match row {
            IprVariant::SmallMutation(v) => (Some(v.gene.as_str()), None),
            IprVariant::Fusion(v) => (
                None,
                Some((
                    v.gene1.as_deref().unwrap_or_default(),
                    v.gene2.as_deref().unwrap_or_default(),
                )),
            ),
            _ => continue,
        };
        let has_genes = single_gene.is_some_and(|g| !g.is_empty())
            || fusion_genes.is_some_and(|(g1, g2)| !g1.is_empty() && !g2.is_empty());
        if !has_genes {
            continue;
        }

        let tag = if single_gene.is_some() {
            variant_type::SMALL_MUTATION
        } else {
            variant_type::STRUCTURAL
        };

        for notation in positional_notations(row) {
            match match_notation(conn, notation).await {
                Ok(matches) => {
                    let rows =
                        get_ipr_statements_from_variants(conn, &matches, disease_name).await?;
                    alterations.extend(tag_rows(rows, row.key(), tag));
                }
                Err(GraphKbError::FeatureNotFound(err)) => {
                    debug!("failed to match positional variants ({}): {}", notation, err);
                    errors += 1;
                    match (single_gene, fusion_genes) {
                        (Some(gene), _) => {
                            problem_genes.insert(gene.to_string());
                        }
                        (None, Some((gene1, gene2))) => {
                            if err.contains(&format!("({})", gene1)) {
                                problem_genes.insert(gene1.to_string());
                            } else if err.contains(&format!("({})", gene2)) {
                                problem_genes.insert(gene2.to_string());
                            } else {
                                problem_genes.insert(gene1.to_string());
                                problem_genes.insert(gene2.to_string());
                            }
                        }
                        (None, None) => {}
                    }
                }
                Err(err) if is_match_failure(&err) => {
                    errors += 1;
                    error!("failed to match positional variants ({}): {}", notation, err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    pb.finish_and_clear();

    if !problem_genes.is_empty() {
        error!("gene finding failures for {:?}", problem_genes);
        error!(
            "{} gene finding failures for positional variants",
            problem_genes.len()
        );
    }
    if errors > 0 {
        error!("skipped {} positional variants due to errors", errors);
    }

    let mut seen = HashSet::new();
    alterations.retain(|row: &KbMatch| seen.insert(row.clone()));

    let tags: BTreeSet<&str> = alterations.iter().map(|a| a.variant_type.as_str()).collect();
    info!(
        "matched {} {} positional variants to {} graphkb annotations",
        variants.len(),
        tags.into_iter().collect::<Vec<_>>().join(", "),
        alterations.len()
    );
    Ok(alterations)
}

async fn annotate_signature(
    conn: &dyn GraphKb,
    disease_name: &str,
    signature_filter: serde_json::Value,
    key: &str,
    tag: &str,
) -> Result<Vec<KbMatch>> {
    let categories: Vec<Record> = from_rows(
        conn.query(&json!({
            "target": {
                "target": "CategoryVariant",
                "filters": {
                    "reference1": {"target": "Signature", "filters": signature_filter},
                },
            },
            "queryType": "similarTo",
            "returnProperties": ["@rid", "displayName"],
        }))
        .await?,
    )?;
    if categories.is_empty() {
        return Ok(Vec::new());
    }
    let rows = get_ipr_statements_from_variants(conn, &categories, disease_name).await?;
    Ok(tag_rows(rows, key, tag).collect())
}

/// Annotate microsatellite instability through signature category variants
pub async fn annotate_msi(
    conn: &dyn GraphKb,
    disease_name: &str,
    msi_category: &str,
) -> Result<Vec<KbMatch>> {
    let category = if msi_category.is_empty() {
        MSI_DEFAULT_CATEGORY
    } else {
        msi_category
    };
    annotate_signature(
        conn,
        disease_name,
        json!({"name": category}),
        category,
        variant_type::MSI,
    )
    .await
}

/// Annotate a tumour mutation burden category, by default high mutation burden
pub async fn annotate_tmb(
    conn: &dyn GraphKb,
    disease_name: &str,
    category: &str,
) -> Result<Vec<KbMatch>> {
    let category = if category.is_empty() {
        TMB_HIGH_CATEGORY
    } else {
        category
    };
    annotate_signature(
        conn,
        disease_name,
        json!({"OR": [{"name": category}, {"displayName": category}]}),
        category,
        variant_type::TMB,
    )
    .await
}
