//! GraphKB connection tests
//!
//! Runs the HTTP connection against a local mock server.

use pori_graphkb::{GraphKb, GraphKbConfig, GraphKbConnection, GraphKbError, QueryOptions};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

const TOKEN: &str = "test-token";

fn config(server: &MockServer) -> GraphKbConfig {
    GraphKbConfig::new(&format!("{}/api", server.uri()))
        .with_auth("user", "secret")
        .with_retries(3, 0)
}

async fn mount_login(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_partial_json(json!({"username": "user", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kbToken": TOKEN})))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_sets_token_header() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(header("Authorization", TOKEN))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [{"@rid": "#1:1"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    assert_eq!(conn.token().as_deref(), Some(TOKEN));

    let rows = conn.query(&json!({"target": "Source"})).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(conn.request_count(), 2);
}

#[tokio::test]
async fn test_login_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad password"})))
        .mount(&server)
        .await;

    let err = GraphKbConnection::connect(config(&server)).await.err().unwrap();
    match err {
        GraphKbError::AuthFailed(message) => assert!(message.contains("bad password")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_query_paginates_until_short_page() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(json!({"skip": 0, "limit": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"@rid": "#1:1"}, {"@rid": "#1:2"}],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(json!({"skip": 2, "limit": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"@rid": "#1:3"}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server).with_page_limit(2))
        .await
        .unwrap();
    let rows = conn.query(&json!({"target": "Feature"})).await.unwrap();
    let rids: Vec<&str> = rows.iter().filter_map(|r| r["@rid"].as_str()).collect();
    assert_eq!(rids, vec!["#1:1", "#1:2", "#1:3"]);
}

#[tokio::test]
async fn test_single_page_query() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"@rid": "#1:1"}, {"@rid": "#1:2"}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let rows = conn
        .query_with(&json!({"target": "Feature"}), QueryOptions::single_page(2))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_query_results_are_cached() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [{"@rid": "#4:4"}]})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let body = json!({"target": "Vocabulary", "filters": {"name": "sensitivity"}});
    let first = conn.query(&body).await.unwrap();
    let second = conn.query(&body).await.unwrap();
    assert_eq!(first, second);

    // skips the cache read, the second server hit
    conn.query_with(&body, QueryOptions::ignore_cache(true))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retry_on_unavailable() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .expect(1)
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let rows = conn.query(&json!({"target": "Statement"})).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_login_again_on_unauthorized() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [{"@rid": "#2:2"}]})),
        )
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let rows = conn.query(&json!({"target": "Feature"})).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_error_status_carries_message() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "unknown class Foo"})),
        )
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let err = conn.query(&json!({"target": "Foo"})).await.unwrap_err();
    match err {
        GraphKbError::Status {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "unknown class Foo");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_source_requires_single_record() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"@rid": "#3:1", "name": "civic"}, {"@rid": "#3:2", "name": "civic"}],
        })))
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let err = conn.get_source("civic").await.unwrap_err();
    assert!(matches!(
        err,
        GraphKbError::RecordCount {
            expected: 1,
            found: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_parse_posts_notation() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/parse"))
        .and(body_partial_json(json!({"content": "KRAS:p.G12D"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "reference1": "KRAS",
                "type": "substitution",
                "break1Start": {"@class": "ProteinPosition", "pos": 12, "refAA": "G"},
                "untemplatedSeq": "D",
            },
        })))
        .mount(&server)
        .await;

    let conn = GraphKbConnection::connect(config(&server)).await.unwrap();
    let parsed = conn.parse("KRAS:p.G12D", false).await.unwrap();
    assert_eq!(parsed.reference1, "KRAS");
    assert_eq!(parsed.variant_type, "substitution");
    assert_eq!(parsed.break1_start.and_then(|p| p.pos), Some(12));
    assert_eq!(parsed.untemplated_seq.as_deref(), Some("D"));
}
