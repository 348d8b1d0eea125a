//! Typed configuration.
//!
//! Service settings load once from environment variables and fail fast if
//! required vars are missing. Sensitive values are wrapped in
//! `secrecy::SecretString` to prevent log leaks. Engine tuning lives in an
//! optional TOML file; every field has a default.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::{ControlConfig, DispatchConfig, RetryConfig, ScannerConfig};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Transactional mail API endpoint. Email alerts are only logged when unset.
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<SecretString>,
    pub mail_from: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            mail_api_url: std::env::var("MAIL_API_URL").ok(),
            mail_api_key: std::env::var("MAIL_API_KEY").ok().map(SecretString::from),
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "alerts@localhost".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Engine tuning, read from TOML.
///
/// ```toml
/// workers = 8
/// per_tenant_concurrency = 8
/// action_timeout_secs = 5
/// scan_interval_secs = 900
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub workers: usize,
    pub lane_capacity: usize,
    pub per_tenant_concurrency: usize,
    pub action_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub scan_interval_secs: u64,
    pub no_reply_after_hours: i64,
    pub retry_window_hours: i64,
    pub retry_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub event_attempts: u32,
    pub event_retry_backoff_ms: u64,
    pub visibility_timeout_secs: i32,
    pub queue_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            lane_capacity: 64,
            per_tenant_concurrency: 8,
            action_timeout_secs: 5,
            cache_ttl_secs: 10,
            scan_interval_secs: 15 * 60,
            no_reply_after_hours: 24,
            retry_window_hours: 24,
            retry_interval_secs: 10 * 60,
            poll_interval_ms: 500,
            event_attempts: 3,
            event_retry_backoff_ms: 250,
            visibility_timeout_secs: 60,
            queue_name: "review_events".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read engine config {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.per_tenant_concurrency == 0 {
            return Err(Error::Config(
                "per_tenant_concurrency must be at least 1".to_string(),
            ));
        }
        if self.action_timeout_secs == 0 {
            return Err(Error::Config("action_timeout_secs must be positive".to_string()));
        }
        if self.scan_interval_secs == 0 {
            return Err(Error::Config("scan_interval_secs must be positive".to_string()));
        }
        if self.no_reply_after_hours <= 0 {
            return Err(Error::Config("no_reply_after_hours must be positive".to_string()));
        }
        if self.retry_window_hours < 0 {
            return Err(Error::Config("retry_window_hours must not be negative".to_string()));
        }
        if self.event_attempts == 0 {
            return Err(Error::Config("event_attempts must be at least 1".to_string()));
        }
        if self.visibility_timeout_secs <= 0 {
            return Err(Error::Config("visibility_timeout_secs must be positive".to_string()));
        }
        if self.queue_name.is_empty() {
            return Err(Error::Config("queue_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn control(&self) -> ControlConfig {
        ControlConfig {
            workers: self.workers,
            lane_capacity: self.lane_capacity,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            event_attempts: self.event_attempts,
            retry_backoff: Duration::from_millis(self.event_retry_backoff_ms),
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            per_tenant_concurrency: self.per_tenant_concurrency,
            action_timeout: self.action_timeout(),
            claim_lease: self.action_timeout() + Duration::from_secs(30),
        }
    }

    pub fn scanner(&self) -> ScannerConfig {
        ScannerConfig {
            interval: Duration::from_secs(self.scan_interval_secs),
            no_reply_after: chrono::Duration::hours(self.no_reply_after_hours),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            window: chrono::Duration::hours(self.retry_window_hours),
            interval: Duration::from_secs(self.retry_interval_secs),
        }
    }
}
