//! # Structured Logging Module
//!
//! Environment-aware structured logging for the coordinator's async message
//! flow. Output is either human-readable or JSON, selected by
//! [`LoggingConfig::format`]; `RUST_LOG` always wins over the configured level.

use crate::config::{ConfigManager, LogFormat, LoggingConfig};
use crate::models::RemoteRequestKey;
use crate::state_machine::RequestState;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let directive = config
            .level
            .clone()
            .unwrap_or_else(|| default_log_level(&environment).to_string());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
        };

        // A host process may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized; keeping it");
        }

        tracing::info!(
            environment = %environment,
            level = %directive,
            format = ?config.format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Uniform record of a ledger operation on one remote request
pub fn log_remote_request_operation(
    operation: &str,
    key: &RemoteRequestKey,
    state: Option<RequestState>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %key.job_id,
        request_type = %key.request_type,
        index = key.index,
        state = state.map(|s| s.as_str()),
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📒 REMOTE_REQUEST_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(default_log_level("test"), "debug");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
    }
}
