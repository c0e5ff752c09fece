// Configuration for GraphKbConnection

use std::time::Duration;

use crate::constants::{DEFAULT_LIMIT, DEFAULT_URL};

/// Configuration for the GraphKB HTTP connection
#[derive(Clone, Debug)]
pub struct GraphKbConfig {
    /// API base url (default: https://graphkb-api.bcgsc.ca/api)
    pub url: String,
    /// Username for authentication
    pub username: String,
    /// Password for authentication
    pub password: String,
    /// Connection timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (default: 120000)
    pub read_timeout_ms: u64,
    /// Attempts per request before giving up on transport errors (default: 15)
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds (default: 2000)
    pub retry_delay_ms: u64,
    /// Page size for paginated queries (default: 1000)
    pub page_limit: usize,
    /// Maximum number of cached query results (default: 10000)
    pub cache_capacity: u64,
}

impl Default for GraphKbConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: String::new(),
            password: String::new(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 120000,
            max_attempts: 15,
            retry_delay_ms: 2000,
            page_limit: DEFAULT_LIMIT,
            cache_capacity: 10000,
        }
    }
}

impl GraphKbConfig {
    /// Create a new config for the given API url
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Config from `GRAPHKB_URL`, falling back to the public API
    pub fn from_env() -> Self {
        match std::env::var("GRAPHKB_URL") {
            Ok(url) if !url.is_empty() => Self::new(&url),
            _ => Self::default(),
        }
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set retry behaviour for transport errors
    pub fn with_retries(mut self, max_attempts: u32, retry_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the page size used by paginated queries
    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Set the query cache size
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
