//! Configuration for the IPR connection and the `ipr` command
//!
//! [`Settings`] layers built-in defaults, an optional config file and
//! `PORI_*` environment variables (`PORI_GRAPHKB__URL`, `PORI_IPR__URL`, ...).
//! Command line flags are applied on top by the caller.

use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use pori_graphkb::GraphKbConfig;
use serde::Deserialize;

use crate::{
    constants::DEFAULT_URL,
    error::{IprError, Result},
};

/// Configuration for the IPR HTTP connection
#[derive(Clone, Debug)]
pub struct IprConfig {
    /// API base url (default: https://iprstaging-api.bcgsc.ca/api)
    pub url: String,
    /// Username for basic auth
    pub username: String,
    /// Password for basic auth
    pub password: String,
    /// Connection timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (default: 600000)
    pub read_timeout_ms: u64,
    /// Pause between async upload status checks in milliseconds (default: 5000)
    pub poll_interval_ms: u64,
}

impl Default for IprConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: String::new(),
            password: String::new(),
            connect_timeout_ms: 10000,
            read_timeout_ms: 600000,
            poll_interval_ms: 5000,
        }
    }
}

impl IprConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// GraphKB settings
#[derive(Clone, Debug, Deserialize)]
pub struct GraphKbSettings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub page_limit: usize,
    pub cache_capacity: u64,
}

/// IPR settings
#[derive(Clone, Debug, Deserialize)]
pub struct IprSettings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

/// Typed settings for one `ipr` run
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub graphkb: GraphKbSettings,
    pub ipr: IprSettings,
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let graphkb = GraphKbConfig::from_env();
        let ipr_url = std::env::var("IPR_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let ipr = IprConfig::new(&ipr_url);

        let mut builder = Config::builder()
            .set_default("graphkb.url", graphkb.url)
            .and_then(|b| b.set_default("graphkb.connect_timeout_ms", graphkb.connect_timeout_ms))
            .and_then(|b| b.set_default("graphkb.read_timeout_ms", graphkb.read_timeout_ms))
            .and_then(|b| b.set_default("graphkb.max_attempts", u64::from(graphkb.max_attempts)))
            .and_then(|b| b.set_default("graphkb.retry_delay_ms", graphkb.retry_delay_ms))
            .and_then(|b| b.set_default("graphkb.page_limit", graphkb.page_limit as u64))
            .and_then(|b| b.set_default("graphkb.cache_capacity", graphkb.cache_capacity))
            .and_then(|b| b.set_default("ipr.url", ipr.url))
            .and_then(|b| b.set_default("ipr.connect_timeout_ms", ipr.connect_timeout_ms))
            .and_then(|b| b.set_default("ipr.read_timeout_ms", ipr.read_timeout_ms))
            .and_then(|b| b.set_default("ipr.poll_interval_ms", ipr.poll_interval_ms))
            .map_err(config_error)?;

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix("PORI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)
    }

    /// GraphKB connection config without credentials
    pub fn graphkb_config(&self) -> GraphKbConfig {
        let graphkb = &self.graphkb;
        GraphKbConfig::new(&graphkb.url)
            .with_timeouts(graphkb.connect_timeout_ms, graphkb.read_timeout_ms)
            .with_retries(graphkb.max_attempts, graphkb.retry_delay_ms)
            .with_page_limit(graphkb.page_limit)
            .with_cache_capacity(graphkb.cache_capacity)
    }

    /// IPR connection config without credentials
    pub fn ipr_config(&self) -> IprConfig {
        let ipr = &self.ipr;
        IprConfig::new(&ipr.url)
            .with_timeouts(ipr.connect_timeout_ms, ipr.read_timeout_ms)
            .with_poll_interval(ipr.poll_interval_ms)
    }
}

fn config_error(e: config::ConfigError) -> IprError {
    IprError::validation(format!("invalid configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ipr_config_builder() {
        let config = IprConfig::new("http://localhost:8081/api/")
            .with_auth("user", "pass")
            .with_timeouts(10, 20)
            .with_poll_interval(0);
        assert_eq!(config.url, "http://localhost:8081/api");
        assert_eq!(config.username, "user");
        assert_eq!(config.connect_timeout_ms, 10);
        assert_eq!(config.read_timeout_ms, 20);
        assert_eq!(config.poll_interval(), Duration::ZERO);
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[graphkb]\nurl = \"http://graphkb.test/api\"\npage_limit = 25\n\n[ipr]\npoll_interval_ms = 100"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.graphkb.url, "http://graphkb.test/api");
        assert_eq!(settings.graphkb.page_limit, 25);
        assert_eq!(settings.ipr.poll_interval_ms, 100);

        let graphkb = settings.graphkb_config();
        assert_eq!(graphkb.url, "http://graphkb.test/api");
        assert_eq!(graphkb.page_limit, 25);
        assert_eq!(settings.ipr_config().poll_interval_ms, 100);
    }
}
