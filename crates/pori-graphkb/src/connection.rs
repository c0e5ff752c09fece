//! GraphKB API connection
//!
//! [`GraphKb`] is the interface the matching and report code talks to.
//! [`GraphKbConnection`] implements it over HTTP with token refresh, retries on
//! transport errors, paginated queries and an md5-keyed query cache.

use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::future::Cache;
use pori_common::{ParsedVariant, Record};
use reqwest::{Client, Method, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::{
    config::GraphKbConfig,
    constants::{TOKEN_REFRESH_MARGIN_SECS, api_path},
    error::{GraphKbError, Result},
    util::{cache_key, join_url, token_expiry},
};

/// Options for a single query
#[derive(Clone, Copy, Debug)]
pub struct QueryOptions {
    /// Keep fetching pages until a short page is returned
    pub paginate: bool,
    /// Neither read nor write the cache
    pub ignore_cache: bool,
    /// Skip the cache read but store the fresh result
    pub force_refresh: bool,
    /// Page size, defaults to the connection's page limit
    pub limit: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            paginate: true,
            ignore_cache: false,
            force_refresh: false,
            limit: None,
        }
    }
}

impl QueryOptions {
    pub fn ignore_cache(ignore_cache: bool) -> Self {
        Self {
            ignore_cache,
            ..Default::default()
        }
    }

    /// A single page of at most `limit` rows
    pub fn single_page(limit: usize) -> Self {
        Self {
            paginate: false,
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Operations the rest of the workspace needs from GraphKB
#[async_trait]
pub trait GraphKb: Send + Sync {
    /// API base url
    fn url(&self) -> &str;

    /// Raw request against an API endpoint, returns the decoded JSON body
    async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>)
    -> Result<Value>;

    /// POST `query`, returning the `result` rows
    async fn query_with(&self, body: &Value, options: QueryOptions) -> Result<Vec<Value>>;

    /// Number of requests made so far
    fn request_count(&self) -> u64;

    /// Requests per second between the first and last request
    fn load(&self) -> Option<f64>;

    async fn query(&self, body: &Value) -> Result<Vec<Value>> {
        self.query_with(body, QueryOptions::default()).await
    }

    async fn get(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::GET, endpoint, None).await
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    /// Parse variant notation with the GraphKB parser
    async fn parse(&self, hgvs: &str, require_features: bool) -> Result<ParsedVariant> {
        let body = json!({"content": hgvs, "requireFeatures": require_features});
        let response = self.post(api_path::PARSE, &body).await?;
        match response.get("result") {
            Some(result) => Ok(serde_json::from_value(result.clone())?),
            None => Err(GraphKbError::InvalidInput(format!(
                "unexpected parser response for {}",
                hgvs
            ))),
        }
    }

    /// The single Source record with the given name
    async fn get_source(&self, name: &str) -> Result<Record> {
        let rows = self
            .query(&json!({"target": "Source", "filters": {"name": name}}))
            .await?;
        if rows.len() != 1 {
            return Err(GraphKbError::RecordCount {
                expected: 1,
                found: rows.len(),
                context: format!("source named {}", name),
            });
        }
        let mut records: Vec<Record> = from_rows(rows)?;
        Ok(records.remove(0))
    }

    /// Fetch records by rid, every rid must resolve
    async fn get_records_by_id(&self, rids: &[String]) -> Result<Vec<Record>> {
        if rids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query(&json!({"target": rids})).await?;
        if rows.len() != rids.len() {
            return Err(GraphKbError::RecordCount {
                expected: rids.len(),
                found: rows.len(),
                context: "records by id".to_string(),
            });
        }
        from_rows(rows)
    }
}

/// Deserialize query rows into typed records
pub fn from_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(GraphKbError::from))
        .collect()
}

/// Query and deserialize the rows
pub async fn query_as<T: DeserializeOwned>(conn: &dyn GraphKb, body: &Value) -> Result<Vec<T>> {
    from_rows(conn.query(body).await?)
}

/// Query with options and deserialize the rows
pub async fn query_as_with<T: DeserializeOwned>(
    conn: &dyn GraphKb,
    body: &Value,
    options: QueryOptions,
) -> Result<Vec<T>> {
    from_rows(conn.query_with(body, options).await?)
}

/// Token info for authentication
#[derive(Clone, Debug)]
struct TokenInfo {
    token: String,
    expires_at: Option<i64>,
}

/// HTTP connection to the GraphKB API
pub struct GraphKbConnection {
    client: Client,
    config: GraphKbConfig,
    token: RwLock<Option<TokenInfo>>,
    credentials: RwLock<Option<(String, String)>>,
    cache: Cache<String, Arc<Vec<Value>>>,
    request_count: AtomicU64,
    first_request: RwLock<Option<Instant>>,
    last_request: RwLock<Option<Instant>>,
}

impl GraphKbConnection {
    /// Create a connection without logging in
    pub fn new(config: GraphKbConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            cache: Cache::new(config.cache_capacity),
            config,
            token: RwLock::new(None),
            credentials: RwLock::new(None),
            request_count: AtomicU64::new(0),
            first_request: RwLock::new(None),
            last_request: RwLock::new(None),
        })
    }

    /// Create a connection and log in with the configured credentials
    pub async fn connect(config: GraphKbConfig) -> Result<Self> {
        let username = config.username.clone();
        let password = config.password.clone();
        let conn = Self::new(config)?;
        conn.login(&username, &password).await?;
        Ok(conn)
    }

    /// Log in and keep the credentials for token refresh
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        {
            let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
            *credentials = Some((username.to_string(), password.to_string()));
        }
        self.authenticate().await
    }

    /// Current bearer token, if logged in
    pub fn token(&self) -> Option<String> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|t| t.token.clone())
    }

    async fn authenticate(&self) -> Result<()> {
        let Some((username, password)) = self
            .credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            return Err(GraphKbError::AuthFailed("no credentials".to_string()));
        };

        let url = join_url(&self.config.url, api_path::TOKEN);
        debug!("Logging in to GraphKB: {}", url);
        self.record_request();

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&json!({"username": username, "password": password}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("GraphKB login failed with status {}: {}", status, body);
            return Err(GraphKbError::AuthFailed(format!(
                "status {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }

        let result: Value = response.json().await?;
        let Some(token) = result.get("kbToken").and_then(Value::as_str) else {
            return Err(GraphKbError::AuthFailed(
                "login response has no kbToken".to_string(),
            ));
        };

        let expires_at = token_expiry(token);
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(TokenInfo {
            token: token.to_string(),
            expires_at,
        });
        debug!("GraphKB login successful, token expires at {:?}", expires_at);
        Ok(())
    }

    fn clear_token(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    fn token_needs_refresh(&self) -> bool {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            None => true,
            Some(TokenInfo {
                expires_at: Some(exp),
                ..
            }) => *exp - chrono::Utc::now().timestamp() < TOKEN_REFRESH_MARGIN_SECS,
            Some(_) => false,
        }
    }

    /// Log in again when the token is missing or about to expire
    async fn refresh_login(&self) -> Result<()> {
        let has_credentials = self
            .credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if has_credentials && self.token_needs_refresh() {
            self.authenticate().await?;
        }
        Ok(())
    }

    fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        {
            let mut first = self.first_request.write().unwrap_or_else(|e| e.into_inner());
            if first.is_none() {
                *first = Some(now);
            }
        }
        let mut last = self.last_request.write().unwrap_or_else(|e| e.into_inner());
        *last = Some(now);
    }

    async fn handle_response(&self, endpoint: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }

        error!("GraphKB request failed with status {}: {}", status, body);
        Err(GraphKbError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message: error_message(&body),
        })
    }
}

#[async_trait]
impl GraphKb for GraphKbConnection {
    fn url(&self) -> &str {
        &self.config.url
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = join_url(&self.config.url, endpoint);
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
            self.refresh_login().await?;
            self.record_request();

            let mut builder = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = self.token() {
                builder = builder.header(header::AUTHORIZATION, token);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let last_attempt = attempt + 1 == attempts;
                    if !last_attempt
                        && (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
                    {
                        warn!("GraphKB returned {}, logging in again", status);
                        self.clear_token();
                        continue;
                    }
                    if !last_attempt && is_retryable(status) {
                        warn!("GraphKB returned {} for {}, retrying", status, endpoint);
                        continue;
                    }
                    return self.handle_response(endpoint, response).await;
                }
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    warn!(
                        "GraphKB connection error (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GraphKbError::AuthFailed(format!("unable to complete request to {}", endpoint))
        }))
    }

    async fn query_with(&self, body: &Value, options: QueryOptions) -> Result<Vec<Value>> {
        if !body.is_object() {
            return Err(GraphKbError::InvalidInput(
                "query body must be a JSON object".to_string(),
            ));
        }

        let key = cache_key(body);
        if !options.ignore_cache
            && !options.force_refresh
            && let Some(hit) = self.cache.get(&key).await
        {
            debug!("GraphKB query cache hit: {}", key);
            return Ok(hit.as_ref().clone());
        }

        let limit = options.limit.unwrap_or(self.config.page_limit).max(1);
        let mut result = Vec::new();
        loop {
            let mut page = body.clone();
            if let Some(map) = page.as_object_mut() {
                map.insert("limit".to_string(), json!(limit));
                map.insert("skip".to_string(), json!(result.len()));
            }
            let content = self.post(api_path::QUERY, &page).await?;
            let rows = match content.get("result") {
                Some(Value::Array(rows)) => rows.clone(),
                _ => Vec::new(),
            };
            let count = rows.len();
            result.extend(rows);
            if !options.paginate || count < limit {
                break;
            }
        }

        if !options.ignore_cache {
            self.cache.insert(key, Arc::new(result.clone())).await;
        }
        Ok(result)
    }

    fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn load(&self) -> Option<f64> {
        let first = (*self.first_request.read().unwrap_or_else(|e| e.into_inner()))?;
        let last = (*self.last_request.read().unwrap_or_else(|e| e.into_inner()))?;
        let elapsed = last.duration_since(first).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(self.request_count() as f64 / elapsed)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// The `message` field of an error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
