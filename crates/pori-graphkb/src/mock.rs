//! In-memory [`GraphKb`] for tests
//!
//! Query handlers are tried in registration order and the first one that
//! returns `Some` answers the query. Unanswered queries return no rows, the same
//! as an empty GraphKB result.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};

use crate::{
    connection::{GraphKb, QueryOptions},
    constants::api_path,
    error::{GraphKbError, Result},
};

type QueryHandler = Box<dyn Fn(&Value) -> Option<Vec<Value>> + Send + Sync>;
type RequestHandler = Box<dyn Fn(&Method, &str, Option<&Value>) -> Option<Value> + Send + Sync>;

/// Scriptable stand-in for a GraphKB connection
pub struct MockGraphKb {
    url: String,
    query_handlers: Vec<QueryHandler>,
    request_handlers: Vec<RequestHandler>,
    queries: Mutex<Vec<Value>>,
    request_count: AtomicU64,
}

impl Default for MockGraphKb {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraphKb {
    pub fn new() -> Self {
        Self {
            url: "http://graphkb.mock/api".to_string(),
            query_handlers: Vec::new(),
            request_handlers: Vec::new(),
            queries: Mutex::new(Vec::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Answer queries for which `handler` returns `Some`
    pub fn on_query<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.query_handlers.push(Box::new(handler));
        self
    }

    /// Answer non-query requests for which `handler` returns `Some`
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Method, &str, Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.request_handlers.push(Box::new(handler));
        self
    }

    /// Answer the variant parser with a fixed result for one notation
    pub fn on_parse(self, notation: &str, result: Value) -> Self {
        let notation = notation.to_string();
        self.on_request(move |method, endpoint, body| {
            let content = body?.get("content")?.as_str()?;
            (*method == Method::POST && endpoint == api_path::PARSE && content == notation)
                .then(|| json!({"result": result.clone()}))
        })
    }

    /// Serve a vocabulary tree given as `(child, parent)` SubClassOf edges
    ///
    /// Term names double as rids so tests can refer to terms by name.
    pub fn with_term_tree(self, ontology_class: &str, edges: &[(&str, &str)]) -> Self {
        let class = ontology_class.to_string();
        let edges: Vec<(String, String)> = edges
            .iter()
            .map(|(child, parent)| (child.to_string(), parent.to_string()))
            .collect();

        self.on_query(move |body| {
            let known = |name: &str| edges.iter().any(|(c, p)| c == name || p == name);
            let term = |name: &str| json!({"@rid": name, "@class": class, "name": name});

            match (query_type(body), body.get("target")?) {
                (Some("similarTo"), Value::Object(_)) => {
                    let name = query_name(body)?;
                    (query_class(body) == Some(class.as_str()) && known(name))
                        .then(|| vec![term(name)])
                }
                (Some(direction @ ("ancestors" | "descendants")), Value::Array(start)) => {
                    let start: Vec<&str> = start.iter().filter_map(Value::as_str).collect();
                    if start.is_empty() || !start.iter().all(|name| known(name)) {
                        return None;
                    }
                    let mut seen: Vec<String> = start.iter().map(|s| s.to_string()).collect();
                    let mut index = 0;
                    while index < seen.len() {
                        let current = seen[index].clone();
                        for (child, parent) in &edges {
                            let next = match direction {
                                "ancestors" if *child == current => parent,
                                "descendants" if *parent == current => child,
                                _ => continue,
                            };
                            if !seen.contains(next) {
                                seen.push(next.clone());
                            }
                        }
                        index += 1;
                    }
                    Some(seen.iter().map(|name| term(name)).collect())
                }
                _ => None,
            }
        })
    }

    /// Every query body seen so far
    pub fn queries(&self) -> Vec<Value> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// `name` filter of a query whose target is a nested subquery or a plain class
pub fn query_name(body: &Value) -> Option<&str> {
    let target = body.get("target")?;
    let filters = if target.is_object() {
        target.get("filters")?
    } else {
        body.get("filters")?
    };
    filters.get("name").and_then(Value::as_str)
}

/// Class targeted by the query, looking through a nested subquery
pub fn query_class(body: &Value) -> Option<&str> {
    let target = body.get("target")?;
    match target {
        Value::String(class) => Some(class),
        Value::Object(_) => target.get("target").and_then(Value::as_str),
        _ => None,
    }
}

/// `queryType` of the query, if any
pub fn query_type(body: &Value) -> Option<&str> {
    body.get("queryType").and_then(Value::as_str)
}

#[async_trait]
impl GraphKb for MockGraphKb {
    fn url(&self) -> &str {
        &self.url
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if endpoint == api_path::QUERY
            && let Some(body) = body
        {
            let rows = self.query_with(body, QueryOptions::default()).await?;
            return Ok(json!({ "result": rows }));
        }
        self.request_handlers
            .iter()
            .find_map(|handler| handler(&method, endpoint, body))
            .ok_or_else(|| GraphKbError::Status {
                endpoint: endpoint.to_string(),
                status: 404,
                message: "no mock response".to_string(),
            })
    }

    async fn query_with(&self, body: &Value, _options: QueryOptions) -> Result<Vec<Value>> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(body.clone());
        Ok(self
            .query_handlers
            .iter()
            .find_map(|handler| handler(body))
            .unwrap_or_default())
    }

    fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn load(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_handler_answers() {
        let conn = MockGraphKb::new()
            .on_query(|body| (query_class(body) == Some("Source")).then(|| vec![json!({"@rid": "#1:1"})]))
            .on_query(|_| Some(vec![]));

        let rows = conn
            .query(&json!({"target": "Source", "filters": {"name": "oncokb"}}))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(conn.queries().len(), 1);

        let source = conn.get_source("oncokb").await.unwrap();
        assert_eq!(source.rid, "#1:1");
    }

    #[tokio::test]
    async fn test_parse_and_missing_request() {
        let conn = MockGraphKb::new().on_parse(
            "KRAS:p.G12D",
            json!({"reference1": "KRAS", "type": "substitution"}),
        );
        let parsed = conn.parse("KRAS:p.G12D", false).await.unwrap();
        assert_eq!(parsed.reference1, "KRAS");
        assert_eq!(parsed.variant_type, "substitution");

        let err = conn.parse("BRAF:p.V600E", false).await.unwrap_err();
        assert!(matches!(err, GraphKbError::Status { status: 404, .. }));
    }

    #[test]
    fn test_query_helpers() {
        let nested = json!({
            "target": {"target": "Vocabulary", "filters": {"name": "amplification"}},
            "queryType": "descendants",
        });
        assert_eq!(query_name(&nested), Some("amplification"));
        assert_eq!(query_class(&nested), Some("Vocabulary"));
        assert_eq!(query_type(&nested), Some("descendants"));

        let flat = json!({"target": "Source", "filters": {"name": "oncokb"}});
        assert_eq!(query_name(&flat), Some("oncokb"));
        assert_eq!(query_type(&flat), None);
    }
}
