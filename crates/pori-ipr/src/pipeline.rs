//! Report creation: input checks, GraphKB annotation, report assembly and upload

use std::path::{Path, PathBuf};

use pori_common::{
    CopyVariant, ExpressionVariant, FusionVariant, IprVariant, KbMatch, SignatureVariant,
    SmallMutation, variant_type,
};
use pori_graphkb::{GraphKb, GraphKbConfig, GraphKbConnection, genes::get_gene_information};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::{
    annotate::{
        annotate_copy_variants, annotate_expression_variants, annotate_msi,
        annotate_positional_variants, annotate_tmb,
    },
    config::IprConfig,
    connection::{IprConnection, UploadOptions},
    constants::{DEFAULT_EXCLUDED_VARIANT_TYPES, TMB_HIGH, TMB_HIGH_CATEGORY},
    error::{IprError, Result},
    inputs::{
        check_comparators, check_variant_links, preprocess_copy_variants,
        preprocess_expression_variants, preprocess_small_mutations,
        preprocess_structural_variants, validate_report_content,
    },
    report::{
        KbMatchFilters, clean_unsupported_content, create_key_alterations, filter_kb_matches,
        filter_structural_variants, germline_kb_matches, multi_variant_filtering,
        select_expression_plots,
    },
    summary::auto_analyst_comments,
    therapeutic::create_therapeutic_options,
    util::{timestamp, trim_empty_values},
};

/// Switches for the report body
#[derive(Clone, Debug)]
pub struct ReportOptions {
    /// Build the therapeutic options table
    pub generate_therapeutics: bool,
    /// Build the automatic analyst comments
    pub generate_comments: bool,
    /// Check germline status of germline-only statement categories
    pub match_germline: bool,
    /// Keep statements where only some of the variant conditions matched
    pub allow_partial_matches: bool,
    /// Show progress bars
    pub interactive: bool,
    /// Custom kbMatches filters, taken from the content when not set
    pub kb_match_filters: Option<KbMatchFilters>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            generate_therapeutics: false,
            generate_comments: true,
            match_germline: true,
            allow_partial_matches: false,
            interactive: false,
            kb_match_filters: None,
        }
    }
}

/// Report content after validation and variant preprocessing
#[derive(Clone, Debug)]
pub struct PreparedContent {
    pub content: Value,
    pub disease_name: String,
    pub small_mutations: Vec<SmallMutation>,
    pub copy_variants: Vec<CopyVariant>,
    pub structural_variants: Vec<FusionVariant>,
    pub expression_variants: Vec<ExpressionVariant>,
}

fn section(content: &Value, name: &str) -> Vec<Value> {
    content
        .get(name)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Validate the content and preprocess its variant sections
pub fn prepare_content(mut content: Value) -> Result<PreparedContent> {
    validate_report_content(&mut content)?;
    let disease_name = content
        .get("kbDiseaseMatch")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let small_mutations = preprocess_small_mutations(section(&content, "smallMutations"))?;
    let copy_variants = preprocess_copy_variants(section(&content, "copyVariants"))?;
    let structural_variants =
        preprocess_structural_variants(section(&content, "structuralVariants"))?;
    let expression_variants =
        preprocess_expression_variants(section(&content, "expressionVariants"))?;
    check_comparators(&content, &expression_variants)?;

    Ok(PreparedContent {
        content,
        disease_name,
        small_mutations,
        copy_variants,
        structural_variants,
        expression_variants,
    })
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Combined tumour mutation burden, `genomeTmb` when given
fn mutation_burden(content: &Value) -> Option<f64> {
    let tmb = content.get("tmburMutationBurden").filter(|t| t.is_object());
    if let Some(total) = as_f64(content.get("genomeTmb"))
        .or_else(|| tmb.and_then(|t| as_f64(t.get("genomeTmb"))))
    {
        return Some(total);
    }
    let tmb = tmb?;
    Some(
        as_f64(tmb.get("genomeIndelTmb")).unwrap_or(0.0)
            + as_f64(tmb.get("genomeSnvTmb")).unwrap_or(0.0),
    )
}

/// MSI category from a list, object or plain string
fn msi_category(content: &Value) -> Option<(String, Option<Map<String, Value>>)> {
    match content.get("msi")? {
        Value::Array(rows) => {
            let row = rows.first()?;
            let category = row.get("kbCategory").and_then(Value::as_str)?;
            Some((category.to_string(), None))
        }
        Value::String(category) if !category.is_empty() => Some((category.clone(), None)),
        Value::Object(row) => {
            let category = row.get("kbCategory").and_then(Value::as_str)?;
            Some((category.to_string(), Some(row.clone())))
        }
        _ => None,
    }
}

fn signature_variant(category: &str, tag: &str, extra: Map<String, Value>) -> SignatureVariant {
    let mut extra = extra;
    for key in ["key", "variant", "variantType", "kbCategory"] {
        extra.remove(key);
    }
    SignatureVariant {
        key: category.to_string(),
        variant: category.to_string(),
        variant_type: tag.to_string(),
        kb_category: Some(category.to_string()),
        extra,
    }
}

fn rows_to_values<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<Vec<Value>> {
    rows.into_iter()
        .map(|row| Ok(trim_empty_values(serde_json::to_value(row)?)))
        .collect()
}

/// Annotate the prepared content against GraphKB and build the upload body
///
/// `ipr_spec` limits the gene properties to what IPR accepts.
pub async fn build_report(
    graphkb: &dyn GraphKb,
    prepared: PreparedContent,
    options: &ReportOptions,
    ipr_spec: Option<&Value>,
) -> Result<Value> {
    let PreparedContent {
        content,
        disease_name,
        small_mutations,
        copy_variants,
        structural_variants,
        expression_variants,
    } = prepared;
    let show_progress = options.interactive;

    let genes_with_variants = check_variant_links(
        &small_mutations,
        &expression_variants,
        &copy_variants,
        &structural_variants,
    );

    info!("annotating {} small mutations", small_mutations.len());
    let small_rows: Vec<IprVariant> = small_mutations.iter().cloned().map(Into::into).collect();
    let mut kb_matches: Vec<KbMatch> =
        annotate_positional_variants(graphkb, &small_rows, &disease_name, show_progress).await?;

    info!("annotating {} structural variants", structural_variants.len());
    let structural_rows: Vec<IprVariant> =
        structural_variants.iter().cloned().map(Into::into).collect();
    kb_matches.extend(
        annotate_positional_variants(graphkb, &structural_rows, &disease_name, show_progress)
            .await?,
    );

    info!("annotating {} copy variants", copy_variants.len());
    kb_matches.extend(
        annotate_copy_variants(graphkb, &copy_variants, &disease_name, show_progress).await?,
    );

    info!("annotating {} expression variants", expression_variants.len());
    kb_matches.extend(
        annotate_expression_variants(graphkb, &expression_variants, &disease_name, show_progress)
            .await?,
    );

    let mut signature_variants: Vec<Value> = section(&content, "signatureVariants");
    let mut signature_rows: Vec<IprVariant> = Vec::new();

    if let Some(burden) = mutation_burden(&content)
        && burden >= TMB_HIGH
    {
        info!("annotating tumour mutation burden {:.2}", burden);
        let category = content
            .pointer("/tmburMutationBurden/kbCategory")
            .and_then(Value::as_str)
            .unwrap_or(TMB_HIGH_CATEGORY);
        let matches = annotate_tmb(graphkb, &disease_name, category).await?;
        if !matches.is_empty() {
            signature_rows.push(
                signature_variant(category, variant_type::TMB, Map::new()).into(),
            );
            kb_matches.extend(matches);
        }
    }

    if let Some((category, row)) = msi_category(&content) {
        info!("annotating microsatellite instability {}", category);
        let matches = annotate_msi(graphkb, &disease_name, &category).await?;
        if !matches.is_empty() {
            signature_rows.push(
                signature_variant(&category, variant_type::MSI, row.unwrap_or_default()).into(),
            );
            kb_matches.extend(matches);
        }
    }
    signature_variants.extend(rows_to_values(&signature_rows)?);

    let all_variants: Vec<IprVariant> = expression_variants
        .iter()
        .cloned()
        .map(IprVariant::from)
        .chain(copy_variants.iter().cloned().map(IprVariant::from))
        .chain(structural_rows)
        .chain(small_rows)
        .chain(signature_rows)
        .collect();

    if options.match_germline {
        let before = kb_matches.len();
        kb_matches = germline_kb_matches(kb_matches, &all_variants, true);
        if kb_matches.len() < before {
            info!("removed {} germline mismatched kbMatches", before - kb_matches.len());
        }
    }

    if !options.allow_partial_matches {
        kb_matches =
            multi_variant_filtering(graphkb, kb_matches, DEFAULT_EXCLUDED_VARIANT_TYPES).await?;
    }

    let filters = match &options.kb_match_filters {
        Some(filters) => filters.clone(),
        None => match content.get("kbMatchFilters") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| IprError::validation(format!("invalid kbMatchFilters: {}", e)))?,
            None => KbMatchFilters::default(),
        },
    };
    if !filters.is_empty() {
        info!("filtering kbMatches");
        kb_matches = filter_kb_matches(kb_matches, &filters);
    }

    let (key_alterations, variant_counts) = create_key_alterations(&kb_matches, &all_variants);

    info!("fetching gene annotations");
    let gene_names: Vec<&String> = genes_with_variants.iter().collect();
    let gene_information = get_gene_information(graphkb, &gene_names).await?;

    let targets = if options.generate_therapeutics {
        info!("generating therapeutic options");
        create_therapeutic_options(graphkb, &kb_matches, &all_variants).await?
    } else {
        Vec::new()
    };

    let comments = if options.generate_comments {
        info!("generating analyst comments");
        auto_analyst_comments(graphkb, &kb_matches, &disease_name, &all_variants).await?
    } else {
        String::new()
    };

    let images = select_expression_plots(&kb_matches, &all_variants);
    let structural = filter_structural_variants(structural_variants, &kb_matches, &gene_information);

    let mut output = content;
    let Some(map) = output.as_object_mut() else {
        return Err(IprError::validation("report content must be a JSON object"));
    };
    map.remove("kbMatchFilters");

    let updates = [
        ("kbMatches", Value::Array(rows_to_values(&kb_matches)?)),
        (
            "copyVariants",
            Value::Array(rows_to_values(
                copy_variants
                    .iter()
                    .filter(|v| genes_with_variants.contains(&v.gene)),
            )?),
        ),
        ("smallMutations", Value::Array(rows_to_values(&small_mutations)?)),
        (
            "expressionVariants",
            Value::Array(rows_to_values(
                expression_variants
                    .iter()
                    .filter(|v| genes_with_variants.contains(&v.gene)),
            )?),
        ),
        ("structuralVariants", Value::Array(rows_to_values(&structural)?)),
        ("signatureVariants", Value::Array(signature_variants)),
        ("kbDiseaseMatch", json!(disease_name)),
        ("kbUrl", json!(graphkb.url())),
        ("kbVersion", json!(timestamp())),
        ("genes", serde_json::to_value(&gene_information)?),
        ("genomicAlterationsIdentified", Value::Array(key_alterations)),
        ("variantCounts", variant_counts),
        ("analystComments", json!({ "comments": comments })),
        ("therapeuticTarget", serde_json::to_value(&targets)?),
    ];
    for (key, value) in updates {
        map.insert(key.to_string(), value);
    }

    let image_rows = map
        .entry("images")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(rows) = image_rows.as_array_mut() {
        for image in images {
            rows.push(serde_json::to_value(image)?);
        }
    }

    clean_unsupported_content(&mut output, ipr_spec);
    Ok(output)
}

/// Everything `create_report` needs besides the content
#[derive(Clone, Debug)]
pub struct CreateReportOptions {
    /// GraphKB connection, with credentials
    pub graphkb: GraphKbConfig,
    /// IPR connection, with credentials
    pub ipr: IprConfig,
    pub report: ReportOptions,
    pub upload: UploadOptions,
    /// Send the report to IPR
    pub ipr_upload: bool,
    /// Where to write the upload body
    pub output_json_path: Option<PathBuf>,
    /// Write the upload body even when the upload succeeds
    pub always_write_output_json: bool,
}

impl Default for CreateReportOptions {
    fn default() -> Self {
        Self {
            graphkb: GraphKbConfig::default(),
            ipr: IprConfig::default(),
            report: ReportOptions::default(),
            upload: UploadOptions::default(),
            ipr_upload: true,
            output_json_path: None,
            always_write_output_json: false,
        }
    }
}

/// Run matching and create the report body, uploading it to IPR
///
/// When the upload fails the body is still written to `output_json_path`
/// before the error is returned.
pub async fn create_report(content: Value, options: &CreateReportOptions) -> Result<Value> {
    let prepared = prepare_content(content)?;

    let ipr_conn = IprConnection::new(options.ipr.clone())?;
    info!("connecting to graphkb: {}", options.graphkb.url);
    let graphkb_conn = GraphKbConnection::connect(options.graphkb.clone()).await?;

    let ipr_spec = if options.ipr_upload {
        match ipr_conn.get_spec().await {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("unable to fetch the IPR spec, genes are not filtered: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut output = build_report(&graphkb_conn, prepared, &options.report, ipr_spec.as_ref()).await?;

    let mut upload_error = None;
    let mut uploaded = false;
    if options.ipr_upload {
        info!("Uploading to IPR {}", ipr_conn.url());
        match ipr_conn.upload_report(&output, options.upload).await {
            Ok(result) => {
                info!("IPR upload complete: {}", result);
                if let (Some(output), Some(result)) = (output.as_object_mut(), result.as_object()) {
                    for (key, value) in result {
                        output.insert(key.clone(), value.clone());
                    }
                }
                uploaded = true;
            }
            Err(e) => {
                error!("IPR upload failed: {}", e);
                upload_error = Some(e);
            }
        }
    }

    info!("made {} requests to graphkb", graphkb_conn.request_count());
    info!(
        "average load {} req/s",
        graphkb_conn.load().unwrap_or(0.0) as u64
    );

    let output_path = options
        .output_json_path
        .as_deref()
        .filter(|_| options.always_write_output_json || !uploaded);
    finish_report(output, output_path, upload_error).await
}

/// Write the report body when a path is given, then return the upload result
///
/// An upload error is returned over a failed write.
async fn finish_report(
    output: Value,
    output_path: Option<&Path>,
    upload_error: Option<IprError>,
) -> Result<Value> {
    if let Some(path) = output_path {
        info!("Writing IPR upload json to: {}", path.display());
        let written = match serde_json::to_string(&output) {
            Ok(text) => tokio::fs::write(path, text).await.map_err(IprError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            error!("unable to write {}: {}", path.display(), e);
            if upload_error.is_none() {
                return Err(e);
            }
        }
    }

    match upload_error {
        Some(e) => Err(e),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_burden() {
        assert_eq!(mutation_burden(&json!({})), None);
        assert_eq!(
            mutation_burden(&json!({"tmburMutationBurden": {"genomeIndelTmb": 2.5, "genomeSnvTmb": 8}})),
            Some(10.5)
        );
        assert_eq!(
            mutation_burden(&json!({
                "genomeTmb": "11.2",
                "tmburMutationBurden": {"genomeIndelTmb": 0.1, "genomeSnvTmb": 0.1},
            })),
            Some(11.2)
        );
        assert_eq!(
            mutation_burden(&json!({"tmburMutationBurden": {"genomeTmb": 3.0}})),
            Some(3.0)
        );
    }

    #[test]
    fn test_msi_category() {
        assert_eq!(msi_category(&json!({})), None);
        assert_eq!(
            msi_category(&json!({"msi": [{"kbCategory": "microsatellite instability"}]})),
            Some(("microsatellite instability".to_string(), None))
        );
        assert_eq!(
            msi_category(&json!({"msi": "microsatellite stable"})),
            Some(("microsatellite stable".to_string(), None))
        );
        let (category, row) =
            msi_category(&json!({"msi": {"kbCategory": "microsatellite instability", "score": 40}}))
                .unwrap();
        assert_eq!(category, "microsatellite instability");
        assert_eq!(row.unwrap()["score"], 40);
        assert_eq!(msi_category(&json!({"msi": ""})), None);
    }

    #[test]
    fn test_signature_variant() {
        let mut extra = Map::new();
        extra.insert("score".to_string(), json!(40));
        extra.insert("key".to_string(), json!("old"));
        let variant = signature_variant("microsatellite instability", "msi", extra);
        assert_eq!(variant.key, "microsatellite instability");
        assert_eq!(variant.variant_type, "msi");
        assert_eq!(variant.extra.get("score"), Some(&json!(40)));
        assert!(!variant.extra.contains_key("key"));
    }

    #[test]
    fn test_prepare_content_rejects_missing_disease() {
        let err = prepare_content(json!({"patientId": "P1", "project": "TEST"})).unwrap_err();
        assert!(matches!(err, IprError::Schema(_)));
    }

    #[test]
    fn test_prepare_content() {
        let prepared = prepare_content(json!({
            "patientId": "P1",
            "project": "TEST",
            "kbDiseaseMatch": "colorectal cancer",
            "copyVariants": [{"gene": "ERBB2", "kbCategory": "amplification"}],
        }))
        .unwrap();
        assert_eq!(prepared.disease_name, "colorectal cancer");
        assert_eq!(prepared.copy_variants.len(), 1);
        assert_eq!(prepared.copy_variants[0].variant, "amplification");
        assert!(prepared.small_mutations.is_empty());
        assert_eq!(prepared.content["template"], "genomic");
    }

    #[tokio::test]
    async fn test_finish_report_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let output = finish_report(json!({"patientId": "P1"}), Some(&path), None)
            .await
            .unwrap();
        assert_eq!(output["patientId"], "P1");
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, output);
    }

    #[tokio::test]
    async fn test_upload_error_kept_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let upload_error = IprError::UploadFailed("bad kbMatches".to_string());

        let err = finish_report(json!({}), Some(&path), Some(upload_error))
            .await
            .unwrap_err();
        assert!(matches!(err, IprError::UploadFailed(ref m) if m == "bad kbMatches"));

        let err = finish_report(json!({}), Some(&path), None).await.unwrap_err();
        assert!(matches!(err, IprError::Io(_)));
    }
}
