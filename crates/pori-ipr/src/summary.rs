//! Automatic analyst comments
//!
//! Matched statements are turned into sentences from their display name
//! templates, merged where they only differ in disease or evidence, and laid
//! out as one HTML section per gene.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use pori_common::{IprVariant, KbMatch, Link, Record, Statement};
use pori_graphkb::{
    GraphKb, TermTreeOptions, from_rows,
    constants::{GRAPHKB_GUI, PREFERRED_GENE_SOURCE, RELEVANCE_BASE_TERMS},
    genes::get_preferred_gene_name,
    statement::categorize_relevance,
    util::ontology_preference_key,
    vocab::get_term_tree,
};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    constants::{COMMENTS_HEADER, ENTREZ_GENE_URL, OTHER_DISEASES},
    error::{IprError, Result},
    inputs::create_graphkb_sv_notation,
    util::{convert_to_rid_set, get_preferred_drug_representation, spaced_json},
};

const VARIANT_CONDITION_CLASSES: &[&str] =
    &["CategoryVariant", "CatalogueVariant", "PositionalVariant"];

/// `a, b, and c`
pub fn natural_join<S: AsRef<str>>(words: &[S]) -> String {
    match words {
        [] => String::new(),
        [single] => single.as_ref().to_string(),
        [head @ .., last] => format!(
            "{}, and {}",
            head.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", "),
            last.as_ref()
        ),
    }
}

fn display_name(record: &Record) -> &str {
    record.display_name.as_deref().unwrap_or(&record.rid)
}

fn natural_join_records(records: &[&Record]) -> String {
    let words: BTreeSet<&str> = records.iter().map(|r| display_name(r)).collect();
    natural_join(&words.into_iter().collect::<Vec<_>>())
}

/// Link to one or more records in the GraphKB client
pub fn create_graphkb_link(record_ids: &[String], record_class: &str) -> String {
    let ids: BTreeSet<&str> = record_ids.iter().map(String::as_str).collect();
    if ids.len() == 1
        && let Some(id) = ids.first()
    {
        return format!("{}/view/{}/{}", GRAPHKB_GUI, record_class, id.replace('#', ""));
    }
    let complex = STANDARD.encode(spaced_json(&json!({"target": ids})));
    let params = serde_urlencoded::to_string([("complex", complex.as_str()), ("@class", record_class)])
        .unwrap_or_default();
    format!("{}/data/table?{}", GRAPHKB_GUI, params)
}

/// Disease names, collapsing unmatched diseases into "other disease types"
pub fn merge_diseases(diseases: &[&Record], disease_matches: &HashSet<String>) -> String {
    let unmatched = diseases
        .iter()
        .map(|d| d.rid.as_str())
        .filter(|rid| !disease_matches.contains(*rid))
        .collect::<BTreeSet<_>>()
        .len();
    if unmatched >= 2 && diseases.iter().all(|d| d.class == "Disease") {
        let mut words: Vec<&str> = diseases
            .iter()
            .filter(|d| disease_matches.contains(&d.rid))
            .map(|d| display_name(d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        words.push(OTHER_DISEASES);
        natural_join(&words)
    } else {
        natural_join_records(diseases)
    }
}

/// Fill in a statement display name template
///
/// The inputs may come from several aggregated statements.
pub fn substitute_sentence_template(
    template: &str,
    conditions: &[Record],
    subjects: &[Record],
    relevance: &Record,
    evidence: &[Record],
    statement_rids: &[String],
    disease_matches: &HashSet<String>,
) -> String {
    let mut disease_conditions: Vec<&Record> =
        conditions.iter().filter(|c| c.class == "Disease").collect();
    let mut variant_conditions: Vec<&Record> = conditions
        .iter()
        .filter(|c| VARIANT_CONDITION_CLASSES.contains(&c.class.as_str()))
        .collect();
    let mut other_conditions: Vec<&Record> = conditions
        .iter()
        .filter(|c| c.class != "Disease" && !VARIANT_CONDITION_CLASSES.contains(&c.class.as_str()))
        .collect();

    let mut result = template.replace("{relevance}", display_name(relevance));

    if template.contains("{subject}") {
        let subject_ids = convert_to_rid_set(subjects);
        disease_conditions.retain(|c| !subject_ids.contains(&c.rid));
        variant_conditions.retain(|c| !subject_ids.contains(&c.rid));
        other_conditions.retain(|c| !subject_ids.contains(&c.rid));
        let subjects: Vec<&Record> = subjects.iter().collect();
        result = result.replace("{subject}", &merge_diseases(&subjects, disease_matches));
    }

    if template.contains("{conditions:disease}") {
        result = result.replace(
            "{conditions:disease}",
            &merge_diseases(&disease_conditions, disease_matches),
        );
    } else {
        other_conditions.extend(disease_conditions);
    }

    if template.contains("{conditions:variant}") {
        result = result.replace(
            "{conditions:variant}",
            &natural_join_records(&variant_conditions),
        );
    } else {
        other_conditions.extend(variant_conditions);
    }

    result = result.replace("{conditions}", &natural_join_records(&other_conditions));

    if template.contains("{evidence}") {
        let names: BTreeSet<&str> = evidence.iter().map(display_name).collect();
        let mut evidence_text = names.into_iter().collect::<Vec<_>>().join(", ");
        if !statement_rids.is_empty() {
            evidence_text = format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a>",
                create_graphkb_link(statement_rids, "Statement"),
                evidence_text
            );
        }
        result = result.replace("{evidence}", &evidence_text);
    }
    result
}

/// Sentences by statement rid, one sentence per group of similar statements
///
/// Statements are grouped when they differ only in disease conditions and
/// evidence. Therapy subjects are replaced by their preferred representation.
pub async fn aggregate_statements(
    conn: &dyn GraphKb,
    statements: Vec<Statement>,
    disease_matches: &HashSet<String>,
) -> Result<HashMap<String, String>> {
    let mut groups: BTreeMap<Vec<String>, Vec<Statement>> = BTreeMap::new();

    for mut statement in statements {
        let subject_rid = statement.subject.as_ref().map(|s| s.rid.clone());
        let mut key: BTreeSet<String> = statement
            .conditions
            .iter()
            .filter(|c| c.class != "Disease")
            .filter(|c| Some(&c.rid) != subject_rid.as_ref())
            .map(|c| display_name(c).to_string())
            .collect();

        let subject_class = statement.subject.as_ref().map(|s| s.class.clone());
        if let Some(class) = subject_class.as_deref()
            && class != "Disease"
        {
            if class == "Therapy"
                && let Some(rid) = subject_rid.as_deref()
            {
                statement.subject = Some(get_preferred_drug_representation(conn, rid).await?);
            }
            if let Some(subject) = &statement.subject {
                key.insert(display_name(subject).to_string());
            }
        }
        key.insert(display_name(&statement.relevance).to_string());
        key.insert(statement.display_name_template.clone().unwrap_or_default());

        groups
            .entry(key.into_iter().collect())
            .or_default()
            .push(statement);
    }

    let mut sentences = HashMap::new();
    for group in groups.values() {
        let Some(first) = group.first() else {
            continue;
        };
        let conditions: Vec<Record> = group.iter().flat_map(|s| s.conditions.clone()).collect();
        let evidence: Vec<Record> = group.iter().flat_map(|s| s.evidence.clone()).collect();
        let subjects: Vec<Record> = group.iter().filter_map(|s| s.subject.clone()).collect();
        let rids: Vec<String> = group.iter().map(|s| s.rid.clone()).collect();

        let sentence = substitute_sentence_template(
            first.display_name_template.as_deref().unwrap_or_default(),
            &conditions,
            &subjects,
            &first.relevance,
            &evidence,
            &rids,
            disease_matches,
        );
        for rid in rids {
            sentences.insert(rid, sentence.clone());
        }
    }
    Ok(sentences)
}

/// Short human readable description of a variant row
pub fn display_variant(variant: &IprVariant) -> Result<String> {
    let gene = match variant {
        IprVariant::Fusion(v) => format!(
            "({},{})",
            v.gene1.as_deref().unwrap_or_default(),
            v.gene2.as_deref().unwrap_or_default()
        ),
        other => other.gene().unwrap_or_default().to_string(),
    };

    if let Some(category) = variant.kb_category().filter(|c| !c.is_empty()) {
        return Ok(format!("{} of {}", category, gene));
    }

    if let IprVariant::Fusion(v) = variant
        && (v.exon1.is_some_and(|e| e != 0) || v.exon2.is_some_and(|e| e != 0))
    {
        return create_graphkb_sv_notation(v);
    }

    let hgvs = match variant {
        IprVariant::SmallMutation(v) => [&v.protein_change, &v.hgvs_protein, &v.hgvs_cds, &v.hgvs_genomic]
            .into_iter()
            .find_map(|h| h.as_deref().filter(|s| !s.is_empty())),
        IprVariant::Fusion(v) => [&v.hgvs_protein, &v.hgvs_cds, &v.hgvs_genomic]
            .into_iter()
            .find_map(|h| h.as_deref().filter(|s| !s.is_empty())),
        _ => None,
    };

    match hgvs {
        Some(hgvs) if !gene.is_empty() => Ok(format!("{}:{}", gene, hgvs)),
        _ if !variant.variant().is_empty() => Ok(variant.variant().to_string()),
        _ => Err(IprError::validation(format!(
            "Unable to form display_variant of {}",
            variant.key()
        ))),
    }
}

/// Sentence listing the observed variants of a gene
pub fn display_variants(gene_name: &str, variants: &[&IprVariant]) -> Result<String> {
    let mut names = BTreeSet::new();
    for variant in variants {
        let name = display_variant(variant)?;
        if name.contains(gene_name) {
            names.insert(name);
        }
    }
    let names: Vec<String> = names.into_iter().collect();
    let text = natural_join(&names);
    Ok(match names.len() {
        0 => String::new(),
        1 => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => format!(
                    "{}{} was observed in this case.",
                    first.to_uppercase(),
                    chars.as_str()
                ),
                None => String::new(),
            }
        }
        _ => format!(
            "Multiple variants of the gene {} were observed in this case: {}",
            gene_name, text
        ),
    })
}

fn sentences_in<'a>(
    sentence_categories: &BTreeMap<&'a str, String>,
    wanted: impl Fn(&str) -> bool,
) -> BTreeSet<&'a str> {
    sentence_categories
        .iter()
        .filter(|(_, category)| wanted(category.as_str()))
        .map(|(sentence, _)| *sentence)
        .collect()
}

/// HTML section for one gene
///
/// Empty when none of the observed variants are on the gene.
pub async fn create_section_html(
    conn: &dyn GraphKb,
    gene_name: &str,
    sentences_by_statement_id: &BTreeMap<String, String>,
    statements: &HashMap<String, Statement>,
    exp_variants: &[&IprVariant],
) -> Result<String> {
    let mut output = vec![format!("<h2>{}</h2>", gene_name)];

    let mut categories: Vec<(&str, &[&str])> = RELEVANCE_BASE_TERMS.to_vec();
    categories.push(("resistance", &["no sensitivity"]));

    let mut sentence_categories: BTreeMap<&str, String> = BTreeMap::new();
    for (statement_id, sentence) in sentences_by_statement_id {
        let Some(statement) = statements.get(statement_id) else {
            continue;
        };
        let category = categorize_relevance(conn, &statement.relevance.rid, &categories).await?;
        sentence_categories.insert(sentence.as_str(), category);
    }

    let mut genes: Vec<Record> = from_rows(
        conn.query(&json!({
            "target": "Feature",
            "filters": {"AND": [
                {"source": {"target": "Source", "filters": {"name": PREFERRED_GENE_SOURCE}}},
                {"name": gene_name},
                {"biotype": "gene"},
            ]},
        }))
        .await?,
    )?;
    let no_sort = HashMap::new();
    genes.sort_by(|a, b| {
        ontology_preference_key(a, &no_sort).cmp(&ontology_preference_key(b, &no_sort))
    });

    let variants_text = display_variants(gene_name, exp_variants)?;
    if variants_text.is_empty() {
        return Ok(String::new());
    }
    if let Some(gene) = genes.first()
        && let Some(description) = gene.description.as_deref().filter(|d| !d.is_empty())
    {
        let description = description.split(". ").take(2).collect::<Vec<_>>().join(". ");
        output.push(format!(
            "\n<blockquote class=\"entrez_description\" cite=\"{}/{}\">\n    {}.\n</blockquote>\n<p>\n    {}\n</p>\n",
            ENTREZ_GENE_URL,
            gene.source_id.as_deref().unwrap_or_default(),
            description,
            variants_text
        ));
    }

    let sections = [
        sentences_in(&sentence_categories, |c| c == "diagnostic"),
        sentences_in(&sentence_categories, |c| c == "biological"),
        sentences_in(&sentence_categories, |c| {
            matches!(c, "therapeutic" | "prognostic")
        }),
        sentences_in(&sentence_categories, |c| {
            !matches!(
                c,
                "diagnostic" | "biological" | "therapeutic" | "prognostic" | "resistance"
            )
        }),
        sentences_in(&sentence_categories, |c| c == "resistance"),
    ];

    let mut used: HashSet<&str> = HashSet::new();
    for section in sections {
        let content: Vec<&str> = section
            .iter()
            .filter(|sentence| !used.contains(*sentence))
            .copied()
            .collect();
        used.extend(section);
        output.push(format!("<p>{}</p>", content.join(". ")));
    }
    Ok(output.join("\n"))
}

fn link_rids(condition: &Record) -> impl Iterator<Item = &str> {
    [&condition.reference1, &condition.reference2]
        .into_iter()
        .flatten()
        .map(Link::rid)
}

/// Statement rids grouped under the preferred name of each gene in their conditions
pub async fn section_statements_by_genes(
    conn: &dyn GraphKb,
    statements: &[&Statement],
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut genes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut names: HashMap<String, String> = HashMap::new();

    for statement in statements {
        for condition in &statement.conditions {
            let references: Vec<&str> = if condition.biotype.as_deref() == Some("gene") {
                vec![condition.rid.as_str()]
            } else {
                link_rids(condition).collect()
            };
            for reference in references {
                let gene = match names.get(reference) {
                    Some(gene) => gene.clone(),
                    None => {
                        let gene = get_preferred_gene_name(conn, reference, "", false).await?;
                        names.insert(reference.to_string(), gene.clone());
                        gene
                    }
                };
                genes
                    .entry(gene)
                    .or_default()
                    .insert(statement.rid.clone());
            }
        }
    }
    Ok(genes)
}

async fn get_statement_details(conn: &dyn GraphKb, rid: &str) -> Result<Statement> {
    let body = conn
        .get(&format!("statements/{}?neighbors=1", rid.replace('#', "")))
        .await?;
    let result = match body {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(result)?)
}

/// HTML analyst comments for the matched statements
pub async fn auto_analyst_comments(
    conn: &dyn GraphKb,
    matches: &[KbMatch],
    disease_name: &str,
    variants: &[IprVariant],
) -> Result<String> {
    let variants_by_key: HashMap<&str, &IprVariant> =
        variants.iter().map(|v| (v.key(), v)).collect();

    let mut keys_by_statement: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for kb_match in matches {
        keys_by_statement
            .entry(kb_match.kb_statement_id.as_str())
            .or_default()
            .insert(kb_match.variant.as_str());
    }

    let mut variants_by_statement: HashMap<&str, Vec<&IprVariant>> = HashMap::new();
    for (rid, keys) in &keys_by_statement {
        let found: Option<Vec<&IprVariant>> =
            keys.iter().map(|key| variants_by_key.get(key).copied()).collect();
        let found = found.unwrap_or_else(|| {
            warn!("No specific variant matched for {}:{:?}", rid, keys);
            Vec::new()
        });
        variants_by_statement.insert(*rid, found);
    }

    let disease_matches: HashSet<String> =
        get_term_tree(conn, disease_name, &TermTreeOptions::for_class("Disease"))
            .await?
            .into_iter()
            .map(|r| r.rid)
            .collect();

    let mut templates: BTreeMap<String, Vec<Statement>> = BTreeMap::new();
    let mut statements: HashMap<String, Statement> = HashMap::new();
    for rid in keys_by_statement.keys() {
        let statement = get_statement_details(conn, rid).await?;
        templates
            .entry(statement.display_name_template.clone().unwrap_or_default())
            .or_default()
            .push(statement.clone());
        statements.insert(statement.rid.clone(), statement);
    }

    let mut sentences = HashMap::new();
    for group in templates.into_values() {
        sentences.extend(aggregate_statements(conn, group, &disease_matches).await?);
    }

    let statement_list: Vec<&Statement> = statements.values().collect();
    let by_gene = section_statements_by_genes(conn, &statement_list).await?;
    let mut sections: Vec<(&String, &BTreeSet<String>)> = by_gene.iter().collect();
    sections.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut output = vec![COMMENTS_HEADER.to_string()];
    for (gene, statement_rids) in sections {
        let mut exp_variants: BTreeMap<&str, &IprVariant> = BTreeMap::new();
        for rid in statement_rids {
            for variant in variants_by_statement.get(rid.as_str()).into_iter().flatten() {
                exp_variants.insert(variant.key(), *variant);
            }
        }
        let section_sentences: BTreeMap<String, String> = statement_rids
            .iter()
            .filter_map(|rid| sentences.get(rid).map(|s| (rid.clone(), s.clone())))
            .collect();
        let section_statements: HashMap<String, Statement> = statement_rids
            .iter()
            .filter_map(|rid| statements.get(rid).map(|s| (rid.clone(), s.clone())))
            .collect();
        let exp_variants: Vec<&IprVariant> = exp_variants.into_values().collect();

        output.push(
            create_section_html(conn, gene, &section_sentences, &section_statements, &exp_variants)
                .await?,
        );
    }
    Ok(output.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pori_common::{CopyVariant, FusionVariant, SmallMutation};

    fn record(rid: &str, class: &str, name: &str) -> Record {
        Record {
            display_name: Some(name.to_string()),
            ..Record::new(rid, class)
        }
    }

    #[test]
    fn test_natural_join() {
        assert_eq!(natural_join::<&str>(&[]), "");
        assert_eq!(natural_join(&["a"]), "a");
        assert_eq!(natural_join(&["a", "b"]), "a, and b");
        assert_eq!(natural_join(&["a", "b", "c"]), "a, b, and c");
    }

    #[test]
    fn test_graphkb_link_single() {
        assert_eq!(
            create_graphkb_link(&["#12:3".to_string()], "Statement"),
            "https://graphkb.bcgsc.ca/view/Statement/12:3"
        );
    }

    #[test]
    fn test_graphkb_link_many() {
        let link = create_graphkb_link(&["#2:2".to_string(), "#1:1".to_string()], "Statement");
        let expected = STANDARD.encode(r##"{"target": ["#1:1", "#2:2"]}"##);
        let encoded = serde_urlencoded::to_string([("complex", expected.as_str())]).unwrap();
        assert!(link.starts_with("https://graphkb.bcgsc.ca/data/table?"));
        assert!(link.contains(&encoded));
        assert!(link.ends_with("%40class=Statement"));
    }

    #[test]
    fn test_merge_diseases_collapses_unmatched() {
        let a = record("#1:1", "Disease", "colorectal cancer");
        let b = record("#1:2", "Disease", "lung cancer");
        let c = record("#1:3", "Disease", "melanoma");
        let matches = HashSet::from(["#1:1".to_string()]);
        assert_eq!(
            merge_diseases(&[&a, &b, &c], &matches),
            "colorectal cancer, and other disease types"
        );
        assert_eq!(merge_diseases(&[&a, &b], &matches), "colorectal cancer, and lung cancer");
    }

    #[test]
    fn test_substitute_sentence_template() {
        let conditions = vec![
            record("#1:1", "Disease", "colorectal cancer"),
            record("#2:1", "PositionalVariant", "KRAS:p.G12D"),
            record("#3:1", "Therapy", "cetuximab"),
        ];
        let subjects = vec![record("#3:1", "Therapy", "cetuximab")];
        let relevance = record("#4:1", "Vocabulary", "resistance");
        let evidence = vec![record("#5:1", "Publication", "pmid:1234")];
        let sentence = substitute_sentence_template(
            "{conditions:variant} is associated with {relevance} to {subject} in {conditions:disease} ({evidence})",
            &conditions,
            &subjects,
            &relevance,
            &evidence,
            &["#9:1".to_string()],
            &HashSet::new(),
        );
        assert_eq!(
            sentence,
            "KRAS:p.G12D is associated with resistance to cetuximab in colorectal cancer (<a href=\"https://graphkb.bcgsc.ca/view/Statement/9:1\" target=\"_blank\" rel=\"noopener\">pmid:1234</a>)"
        );
    }

    #[test]
    fn test_display_variant() {
        let copy = IprVariant::Copy(CopyVariant {
            gene: "ERBB2".into(),
            kb_category: Some("amplification".into()),
            ..Default::default()
        });
        assert_eq!(display_variant(&copy).unwrap(), "amplification of ERBB2");

        let mutation = IprVariant::SmallMutation(SmallMutation {
            gene: "KRAS".into(),
            protein_change: Some("p.G12D".into()),
            ..Default::default()
        });
        assert_eq!(display_variant(&mutation).unwrap(), "KRAS:p.G12D");

        let fusion = IprVariant::Fusion(FusionVariant {
            gene1: Some("EML4".into()),
            gene2: Some("ALK".into()),
            exon1: Some(13),
            exon2: Some(20),
            ..Default::default()
        });
        assert_eq!(display_variant(&fusion).unwrap(), "(EML4,ALK):fusion(e.13,e.20)");

        let blank = IprVariant::SmallMutation(SmallMutation::default());
        assert!(display_variant(&blank).is_err());
    }

    #[test]
    fn test_display_variants() {
        let a = IprVariant::SmallMutation(SmallMutation {
            gene: "KRAS".into(),
            protein_change: Some("p.G12D".into()),
            ..Default::default()
        });
        let b = IprVariant::SmallMutation(SmallMutation {
            gene: "KRAS".into(),
            protein_change: Some("p.G13D".into()),
            ..Default::default()
        });
        assert_eq!(
            display_variants("KRAS", &[&a]).unwrap(),
            "KRAS:p.G12D was observed in this case."
        );
        assert_eq!(
            display_variants("KRAS", &[&a, &b]).unwrap(),
            "Multiple variants of the gene KRAS were observed in this case: KRAS:p.G12D, and KRAS:p.G13D"
        );
        assert_eq!(display_variants("BRAF", &[&a]).unwrap(), "");
    }
}
