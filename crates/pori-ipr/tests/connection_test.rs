//! IPR connection tests
//!
//! Runs uploads against a local mock server. Request bodies are deflated, so
//! body checks decode them first.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use pori_ipr::{IprConfig, IprConnection, IprError, UploadOptions};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

// base64 of user:secret
const BASIC_AUTH: &str = "Basic dXNlcjpzZWNyZXQ=";

fn connection(server: &MockServer) -> IprConnection {
    let config = IprConfig::new(&format!("{}/api", server.uri()))
        .with_auth("user", "secret")
        .with_poll_interval(0);
    IprConnection::new(config).unwrap()
}

fn decoded_body(request: &Request) -> Option<Value> {
    let mut text = String::new();
    ZlibDecoder::new(&request.body[..])
        .read_to_string(&mut text)
        .ok()?;
    serde_json::from_str(&text).ok()
}

fn report() -> Value {
    json!({"patientId": "P1", "project": "TEST", "kbDiseaseMatch": "cancer", "images": []})
}

#[tokio::test]
async fn test_sync_upload_sends_deflated_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reports"))
        .and(query_param("ignore_extra_fields", "true"))
        .and(header("Authorization", BASIC_AUTH))
        .and(header("Content-Encoding", "deflate"))
        .and(|request: &Request| {
            decoded_body(request).is_some_and(|body| body["patientId"] == "P1")
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R1"})))
        .expect(1)
        .mount(&server)
        .await;

    let conn = connection(&server);
    let options = UploadOptions {
        ignore_extra_fields: true,
        ..Default::default()
    };
    let result = conn.upload_report(&report(), options).await.unwrap();
    assert_eq!(result["ident"], "R1");
    assert_eq!(conn.request_count(), 1);
}

#[tokio::test]
async fn test_error_message_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reports"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "patientId is required"}})),
        )
        .mount(&server)
        .await;

    let err = connection(&server)
        .upload_report(&json!({}), UploadOptions::default())
        .await
        .unwrap_err();
    match err {
        IprError::Status {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "patientId is required");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_async_upload_creates_project_and_polls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "OTHER"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/project"))
        .and(|request: &Request| decoded_body(request).is_some_and(|b| b["name"] == "TEST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "TEST"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/reports-async"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ident": "R2", "state": "waiting"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/reports-async/R2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R2", "state": "waiting"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/reports-async/R2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R2", "state": "ready"})))
        .mount(&server)
        .await;

    let options = UploadOptions {
        async_upload: true,
        mins_to_wait: 1,
        ..Default::default()
    };
    let result = connection(&server)
        .upload_report(&report(), options)
        .await
        .unwrap();
    assert_eq!(result["state"], "ready");
    assert_eq!(result["ident"], "R2");
}

#[tokio::test]
async fn test_async_upload_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "TEST"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/project"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/reports-async"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R3"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/reports-async/R3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "failed", "failedReason": "bad kbMatches"})),
        )
        .mount(&server)
        .await;

    let options = UploadOptions {
        async_upload: true,
        ..Default::default()
    };
    let err = connection(&server)
        .upload_report(&report(), options)
        .await
        .unwrap_err();
    assert!(matches!(err, IprError::UploadFailed(ref m) if m.contains("bad kbMatches")));
}

fn image_files(dir: &tempfile::TempDir, count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let path = dir.path().join(format!("plot{}.png", i));
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(b"\x89PNG").unwrap();
            json!({
                "key": format!("expDensity.GENE{}", i),
                "path": path.to_string_lossy(),
                "title": format!("GENE{} expression", i),
            })
        })
        .collect()
}

#[tokio::test]
async fn test_images_uploaded_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reports"))
        .and(|request: &Request| {
            decoded_body(request)
                .is_some_and(|b| b["images"].as_array().is_some_and(|images| images.is_empty()))
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/reports/R1/image"))
        .and(header("Authorization", BASIC_AUTH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"key": "expDensity.GENE0", "upload": "successful"}])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut content = report();
    content["images"] = Value::Array(image_files(&dir, 5));

    connection(&server)
        .upload_report(&content, UploadOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_image_upload_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ident": "R1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/reports/R1/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"key": "expDensity.GENE0", "upload": "failed"}])),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut content = report();
    content["images"] = Value::Array(image_files(&dir, 1));

    let err = connection(&server)
        .upload_report(&content, UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IprError::UploadFailed(ref m) if m.contains("expDensity.GENE0")));
}

#[tokio::test]
async fn test_set_analyst_comments_and_spec() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/reports/R1/summary/analyst-comments"))
        .and(|request: &Request| decoded_body(request).is_some_and(|b| b["comments"] == "<p>x</p>"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"comments": "<p>x</p>"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/spec.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"openapi": "3.0.0"})))
        .mount(&server)
        .await;

    let conn = connection(&server);
    let result = conn
        .set_analyst_comments("R1", &json!({"comments": "<p>x</p>"}))
        .await
        .unwrap();
    assert_eq!(result["comments"], "<p>x</p>");
    assert_eq!(conn.get_spec().await.unwrap()["openapi"], "3.0.0");
}
