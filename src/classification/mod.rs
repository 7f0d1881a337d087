//! # Remote Failure Classification
//!
//! Turns an arbitrary error raised by a remote client into a [`FailureRecord`].
//!
//! Classification walks a chain of [`FailureClassification`] strategies in
//! priority order (highest first). Each strategy recognises one concrete error
//! kind by downcasting somewhere along the `anyhow` cause chain, so errors
//! wrapped in `.context(...)` are still recognised. The catch-all strategy has
//! the lowest priority and accepts everything, which makes every error
//! classifiable.
//!
//! ```text
//! ┌────────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ anyhow::Error  │────▶│ FailureClassifier│────▶│ FailureRecord │
//! │ (client error) │     │ strategy chain   │     │ type/code/msg │
//! └────────────────┘     └──────────────────┘     └───────────────┘
//! ```

use crate::clients::{HttpError, NetworkError};
use crate::models::{FailureRecord, FailureType};

/// One strategy in the classification chain
pub trait FailureClassification: Send + Sync {
    fn classifier_name(&self) -> &'static str;

    /// Higher runs first
    fn priority(&self) -> i32;

    fn can_classify(&self, error: &anyhow::Error) -> bool;

    fn classify(&self, error: &anyhow::Error) -> FailureRecord;
}

fn find_cause<T: std::error::Error + Send + Sync + 'static>(error: &anyhow::Error) -> Option<&T> {
    error.chain().find_map(|cause| cause.downcast_ref::<T>())
}

pub struct NetworkFailureClassification;

impl FailureClassification for NetworkFailureClassification {
    fn classifier_name(&self) -> &'static str {
        "network"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_classify(&self, error: &anyhow::Error) -> bool {
        find_cause::<NetworkError>(error).is_some()
    }

    fn classify(&self, error: &anyhow::Error) -> FailureRecord {
        match find_cause::<NetworkError>(error) {
            Some(network) => FailureRecord::new(
                FailureType::Network,
                network.kind.code(),
                Some(network.message.clone()),
            ),
            None => UnknownFailureClassification.classify(error),
        }
    }
}

pub struct HttpFailureClassification;

impl FailureClassification for HttpFailureClassification {
    fn classifier_name(&self) -> &'static str {
        "http"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn can_classify(&self, error: &anyhow::Error) -> bool {
        find_cause::<HttpError>(error).is_some()
    }

    fn classify(&self, error: &anyhow::Error) -> FailureRecord {
        match find_cause::<HttpError>(error) {
            Some(http) => FailureRecord::new(
                FailureType::Http,
                i32::from(http.status),
                Some(http.reason.clone()),
            ),
            None => UnknownFailureClassification.classify(error),
        }
    }
}

/// Accepts anything; uses the OS error code when an `io::Error` is in the chain
pub struct UnknownFailureClassification;

impl FailureClassification for UnknownFailureClassification {
    fn classifier_name(&self) -> &'static str {
        "unknown"
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn can_classify(&self, _error: &anyhow::Error) -> bool {
        true
    }

    fn classify(&self, error: &anyhow::Error) -> FailureRecord {
        let code = find_cause::<std::io::Error>(error)
            .and_then(std::io::Error::raw_os_error)
            .unwrap_or(0);
        FailureRecord::new(FailureType::Unknown, code, Some(error.to_string()))
    }
}

pub struct FailureClassifier {
    strategies: Vec<Box<dyn FailureClassification>>,
}

impl FailureClassifier {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(NetworkFailureClassification),
            Box::new(HttpFailureClassification),
        ])
    }

    /// Strategies are sorted by priority; the catch-all is always appended
    pub fn with_strategies(mut strategies: Vec<Box<dyn FailureClassification>>) -> Self {
        strategies.push(Box::new(UnknownFailureClassification));
        strategies.sort_by_key(|strategy| std::cmp::Reverse(strategy.priority()));
        Self { strategies }
    }

    pub fn classify(&self, error: &anyhow::Error) -> FailureRecord {
        let strategy = self
            .strategies
            .iter()
            .find(|strategy| strategy.can_classify(error));

        match strategy {
            Some(strategy) => {
                let record = strategy.classify(error);
                tracing::debug!(
                    classifier = strategy.classifier_name(),
                    failure_type = %record.failure_type,
                    code = record.code,
                    "Classified remote failure"
                );
                record
            }
            None => UnknownFailureClassification.classify(error),
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
