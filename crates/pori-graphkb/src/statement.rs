// Statement lookup and relevance categories

use pori_common::{Record, Statement, convert_to_rid_list};
use serde_json::json;
use tracing::debug;

use crate::{
    connection::{GraphKb, query_as},
    constants::{FAILED_REVIEW_STATUS, statement_return_properties},
    error::Result,
    vocab::get_terms_set,
};

/// First category whose relevance terms contain `relevance_rid`
///
/// Categories are checked in the order given; an empty string means no match.
pub async fn categorize_relevance(
    conn: &dyn GraphKb,
    relevance_rid: &str,
    category_base_terms: &[(&str, &[&str])],
) -> Result<String> {
    for (category, base_terms) in category_base_terms {
        let term_set = get_terms_set(conn, base_terms, false).await?;
        if term_set.contains(relevance_rid) {
            return Ok(category.to_string());
        }
    }
    Ok(String::new())
}

/// Statements with any of the variants as a condition
pub async fn get_statements_from_variants(
    conn: &dyn GraphKb,
    variants: &[Record],
    failed_review: bool,
) -> Result<Vec<Statement>> {
    if variants.is_empty() {
        return Ok(Vec::new());
    }
    let statements: Vec<Statement> = query_as(
        conn,
        &json!({
            "target": "Statement",
            "filters": {"conditions": convert_to_rid_list(variants), "operator": "CONTAINSANY"},
            "returnProperties": statement_return_properties(),
        }),
    )
    .await?;

    let total = statements.len();
    let statements: Vec<Statement> = statements
        .into_iter()
        .filter(|s| failed_review || s.review_status.as_deref() != Some(FAILED_REVIEW_STATUS))
        .collect();
    if statements.len() < total {
        debug!(
            "dropped {} statements that failed review",
            total - statements.len()
        );
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RELEVANCE_BASE_TERMS;
    use crate::mock::{MockGraphKb, query_class};

    #[tokio::test]
    async fn test_categorize_relevance_in_order() {
        let conn = MockGraphKb::new().with_term_tree(
            "Vocabulary",
            &[
                ("sensitivity", "therapeutic efficacy"),
                ("favourable prognosis", "prognostic indicator"),
                ("likely pathogenic", "pathogenic"),
            ],
        );

        let category = categorize_relevance(&conn, "sensitivity", RELEVANCE_BASE_TERMS)
            .await
            .unwrap();
        assert_eq!(category, "therapeutic");

        let category = categorize_relevance(&conn, "favourable prognosis", RELEVANCE_BASE_TERMS)
            .await
            .unwrap();
        assert_eq!(category, "prognostic");

        let category = categorize_relevance(&conn, "likely pathogenic", RELEVANCE_BASE_TERMS)
            .await
            .unwrap();
        assert_eq!(category, "cancer predisposition");

        let category = categorize_relevance(&conn, "unrelated", RELEVANCE_BASE_TERMS)
            .await
            .unwrap();
        assert_eq!(category, "");
    }

    #[tokio::test]
    async fn test_failed_review_statements_dropped() {
        let conn = MockGraphKb::new().on_query(|body| {
            (query_class(body) == Some("Statement")).then(|| {
                vec![
                    json!({"@rid": "#1:1", "reviewStatus": "passed"}),
                    json!({"@rid": "#1:2", "reviewStatus": "failed"}),
                    json!({"@rid": "#1:3", "reviewStatus": null}),
                ]
            })
        });
        let variants = vec![Record::new("#5:5", "PositionalVariant")];

        let kept = get_statements_from_variants(&conn, &variants, false)
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|s| s.rid != "#1:2"));

        let all = get_statements_from_variants(&conn, &variants, true)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_no_variants_no_query() {
        let conn = MockGraphKb::new();
        let statements = get_statements_from_variants(&conn, &[], false).await.unwrap();
        assert!(statements.is_empty());
        assert!(conn.queries().is_empty());
    }
}
