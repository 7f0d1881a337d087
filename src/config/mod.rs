//! # Job Coordinator Configuration
//!
//! Layered configuration built with the `config` crate. Sources, lowest
//! precedence first:
//!
//! 1. Built-in defaults ([`CoordinatorConfig::default`])
//! 2. `config/job-coordinator.toml`
//! 3. `config/job-coordinator.{environment}.toml`
//! 4. Environment variables prefixed `JOB_COORDINATOR__`, with `__` between
//!    path segments (`JOB_COORDINATOR__MESSAGING__WORKER_COUNT=8`)
//!
//! The environment name comes from `JOB_COORDINATOR_ENV` and defaults to
//! `development`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use job_coordinator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let workers = manager.config().messaging.worker_count;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::models::RemoteRequestType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl CoordinatorConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.messaging.queue_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "messaging.queue_name",
                "messaging configuration",
            ));
        }

        if self.messaging.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "messaging.worker_count",
                "0",
                "at least one consumer worker is required",
            ));
        }

        if self.messaging.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "messaging.event_channel_capacity",
                "0",
                "event channel capacity must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "every remote request needs at least one attempt",
            ));
        }

        for key in self.dispatch.delays_ms.keys() {
            if key.parse::<RemoteRequestType>().is_err() {
                return Err(ConfigurationError::unknown_request_type(
                    key.clone(),
                    "dispatch.delays_ms",
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins over the configured url
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL").ok().or_else(|| self.url.clone())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub queue_name: String,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub worker_count: usize,
    pub event_channel_capacity: usize,
}

impl MessagingConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_name: "remote_requests".to_string(),
            visibility_timeout_seconds: 30,
            poll_interval_ms: 250,
            worker_count: 4,
            event_channel_capacity: 1000,
        }
    }
}

/// Fixed per-type delays; there is no backoff growth
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_delay_ms: u64,
    /// Keyed by request type string, e.g. `"machine/retrieve"`
    pub delays_ms: BTreeMap<String, u64>,
}

impl DispatchConfig {
    pub fn delay_for(&self, request_type: RemoteRequestType) -> Duration {
        let millis = self
            .delays_ms
            .get(request_type.as_str())
            .copied()
            .unwrap_or(self.default_delay_ms);
        Duration::from_millis(millis)
    }

    /// Same delay for every type, for tests and local runs
    pub fn uniform(delay_ms: u64) -> Self {
        Self {
            default_delay_ms: delay_ms,
            delays_ms: BTreeMap::new(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let delays_ms = [
            (RemoteRequestType::ResultsJobRetrieve, 30_000),
            (RemoteRequestType::SerializedSuiteRetrieve, 5_000),
            (RemoteRequestType::MachineRetrieve, 10_000),
            (RemoteRequestType::WorkerJobRetrieve, 10_000),
        ]
        .into_iter()
        .map(|(request_type, delay)| (request_type.as_str().to_string(), delay))
        .collect();

        Self {
            default_delay_ms: 5_000,
            delays_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per remote action, the first one included
    pub max_attempts: u32,
    /// HTTP statuses that halt a repeatable request instead of failing it
    pub halt_on_http_status: Vec<u16>,
}

impl RetryConfig {
    pub fn halts_on(&self, status: i32) -> bool {
        self.halt_on_http_status
            .iter()
            .any(|halt| i32::from(*halt) == status)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            halt_on_http_status: vec![429, 503],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to an environment-derived level
    pub level: Option<String>,
    pub format: LogFormat,
}
