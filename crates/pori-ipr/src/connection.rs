//! IPR API connection
//!
//! Requests use basic auth. JSON bodies are zlib compressed and sent with
//! `Content-Encoding: deflate`. Report upload is either a single
//! synchronous POST or an async job that is polled until it settles. Images
//! referenced by path are posted afterwards in multipart batches.

use std::{
    io::Write,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use flate2::{Compression, write::ZlibEncoder};
use reqwest::{
    Client, Method, Response, header,
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::{
    config::IprConfig,
    constants::{ASYNC_DONE_STATES, ASYNC_FAILED_STATE, IMAGE_BATCH_SIZE, api_path},
    error::{IprError, Result},
};

/// How a report is sent to IPR
#[derive(Clone, Copy, Debug)]
pub struct UploadOptions {
    /// Use the async job endpoint and poll for completion
    pub async_upload: bool,
    /// Minutes to keep polling an async upload
    pub mins_to_wait: u64,
    /// Ask the API to ignore fields it does not know
    pub ignore_extra_fields: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            async_upload: false,
            mins_to_wait: 5,
            ignore_extra_fields: false,
        }
    }
}

/// HTTP connection to the IPR API
pub struct IprConnection {
    client: Client,
    config: IprConfig,
    request_count: AtomicU64,
}

impl IprConnection {
    pub fn new(config: IprConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            request_count: AtomicU64::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Request with an optional JSON body, returns the decoded JSON response
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        debug!("IPR {} {}", method, url);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut builder = self
            .client
            .request(method, &url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_ENCODING, "deflate")
                .body(deflate(body)?);
        }

        let response = builder.send().await?;
        handle_response(endpoint, response).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::GET, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    /// The IPR OpenAPI spec
    pub async fn get_spec(&self) -> Result<Value> {
        self.get(api_path::SPEC).await
    }

    /// Replace the analyst comments of an uploaded report
    pub async fn set_analyst_comments(&self, report_id: &str, comments: &Value) -> Result<Value> {
        let endpoint = format!("{}/{}/summary/analyst-comments", api_path::REPORTS, report_id);
        self.request(Method::PUT, &endpoint, Some(comments)).await
    }

    /// Create the project if IPR does not know it yet
    async fn ensure_project(&self, project: &str) -> Result<()> {
        let projects = self.get(api_path::PROJECT).await?;
        let exists = projects
            .as_array()
            .into_iter()
            .flatten()
            .any(|p| p.get("name").and_then(Value::as_str) == Some(project));
        if !exists {
            info!("creating IPR project {}", project);
            self.post(api_path::PROJECT, &json!({ "name": project }))
                .await?;
        }
        Ok(())
    }

    /// Upload the report body and then its images
    ///
    /// Images with a `path` are sent as files after the report exists and are
    /// left out of the JSON body.
    pub async fn upload_report(&self, content: &Value, options: UploadOptions) -> Result<Value> {
        let mut body = content.clone();
        let images = take_file_images(&mut body);

        let result = if options.async_upload {
            if let Some(project) = body.get("project").and_then(Value::as_str) {
                self.ensure_project(project).await?;
            }
            self.upload_async(&body, options.mins_to_wait).await?
        } else {
            let query = serde_urlencoded::to_string([(
                "ignore_extra_fields",
                options.ignore_extra_fields.to_string(),
            )])
            .map_err(|e| IprError::UploadFailed(e.to_string()))?;
            let endpoint = format!("{}?{}", api_path::REPORTS, query);
            self.post(&endpoint, &body).await?
        };

        if !images.is_empty() {
            let Some(ident) = result.get("ident").and_then(Value::as_str) else {
                return Err(IprError::UploadFailed(
                    "upload response has no report ident for the images".to_string(),
                ));
            };
            self.post_images(ident, &images).await?;
        }
        Ok(result)
    }

    async fn upload_async(&self, body: &Value, mins_to_wait: u64) -> Result<Value> {
        let created = self.post(api_path::REPORTS_ASYNC, body).await?;
        let Some(ident) = created.get("ident").and_then(Value::as_str) else {
            return Err(IprError::UploadFailed(
                "async upload response has no ident".to_string(),
            ));
        };

        let interval = self.config.poll_interval();
        let max_polls = (mins_to_wait * 60_000 / self.config.poll_interval_ms.max(1)).max(1);
        let endpoint = format!("{}/{}", api_path::REPORTS_ASYNC, ident);

        for poll in 0..max_polls {
            tokio::time::sleep(interval).await;
            let status = self.get(&endpoint).await?;
            let state = status.get("state").and_then(Value::as_str).unwrap_or_default();
            debug!("async report {} is {} (poll {})", ident, state, poll + 1);

            if ASYNC_DONE_STATES.contains(&state) {
                return Ok(status);
            }
            if state == ASYNC_FAILED_STATE {
                let reason = status
                    .get("failedReason")
                    .and_then(Value::as_str)
                    .unwrap_or("no reason given");
                return Err(IprError::UploadFailed(format!(
                    "async report upload failed: {}",
                    reason
                )));
            }
        }

        Err(IprError::UploadFailed(format!(
            "async report {} did not finish within {} minutes",
            ident, mins_to_wait
        )))
    }

    /// Post report images in multipart batches
    pub async fn post_images(&self, report_id: &str, images: &[Value]) -> Result<()> {
        let endpoint = format!("{}/{}/image", api_path::REPORTS, report_id);
        let url = self.endpoint_url(&endpoint);

        for batch in images.chunks(IMAGE_BATCH_SIZE) {
            let mut form = Form::new();
            for image in batch {
                let (Some(key), Some(path)) = (
                    image.get("key").and_then(Value::as_str),
                    image.get("path").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let data = tokio::fs::read(path).await?;
                let file_name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| key.to_string());
                form = form.part(key.to_string(), Part::bytes(data).file_name(file_name));
                for field in ["title", "caption"] {
                    if let Some(text) = image.get(field).and_then(Value::as_str) {
                        form = form.text(format!("{}.{}", key, field), text.to_string());
                    }
                }
            }

            info!("uploading {} images to report {}", batch.len(), report_id);
            self.request_count.fetch_add(1, Ordering::Relaxed);
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .header(header::ACCEPT, "application/json")
                .multipart(form)
                .send()
                .await?;
            let result = handle_response(&endpoint, response).await?;

            let failed: Vec<String> = result
                .as_array()
                .into_iter()
                .flatten()
                .filter(|entry| entry.get("upload").and_then(Value::as_str) != Some("successful"))
                .map(|entry| {
                    entry
                        .get("key")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string()
                })
                .collect();
            if !failed.is_empty() {
                return Err(IprError::UploadFailed(format!(
                    "image upload failed for {}",
                    failed.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Remove the images with a file path from the body, returning them
fn take_file_images(body: &mut Value) -> Vec<Value> {
    let Some(images) = body.get_mut("images").and_then(Value::as_array_mut) else {
        return Vec::new();
    };
    let (files, inline): (Vec<Value>, Vec<Value>) = images
        .drain(..)
        .partition(|image| image.get("path").is_some_and(|p| !p.is_null()));
    *images = inline;
    files
}

fn deflate(body: &Value) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&serde_json::to_vec(body)?)?;
    Ok(encoder.finish()?)
}

async fn handle_response(endpoint: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str(&body)?);
    }

    error!("IPR request to {} failed with status {}: {}", endpoint, status, body);
    Err(IprError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// `error.message` (or `message`) of an error body, or the raw body
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
