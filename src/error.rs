//! Error taxonomy and caller-side retry helpers
//!
//! Every fallible library operation returns [`SyncError`]. Errors are grouped into
//! an [`ErrorCategory`] so hosts can decide what to surface and what to retry.
//! The library itself never retries; [`with_retry`] is for hosts that choose to
//! re-invoke `connect` after a network failure.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid endpoint/config fields. Raised before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error(
        "version conflict on document {document_id}: edit targets version {edit_version}, shadow is at {shadow_version}"
    )]
    VersionConflict {
        document_id: String,
        edit_version: u64,
        shadow_version: u64,
    },

    #[error("malformed edit: {0}")]
    MalformedEdit(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("document {0} is already registered")]
    DuplicateDocument(String),

    #[error("document {0} is not registered")]
    NotRegistered(String),

    #[error("document {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network failures (retryable by the caller)
    Network,

    /// Configuration errors (fatal, not retryable)
    Configuration,

    /// Per-document version conflicts (patch discarded)
    Conflict,

    /// Malformed edits and protocol violations (logged and ignored)
    Protocol,

    /// Misuse by the caller: duplicate, unknown or missing documents
    Caller,

    /// Local I/O and serialization failures
    Io,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Configuration(_) => ErrorCategory::Configuration,
            SyncError::Connection(_) | SyncError::NotConnected => ErrorCategory::Network,
            SyncError::VersionConflict { .. } => ErrorCategory::Conflict,
            SyncError::MalformedEdit(_) | SyncError::Protocol(_) => ErrorCategory::Protocol,
            SyncError::DuplicateDocument(_)
            | SyncError::NotRegistered(_)
            | SyncError::NotFound(_) => ErrorCategory::Caller,
            SyncError::Io(_) | SyncError::Json(_) => ErrorCategory::Io,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub(crate) fn connection(err: impl std::fmt::Display) -> Self {
        SyncError::Connection(err.to_string())
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_retryable() || attempts >= policy.max_attempts => return Err(err),
            Err(err) => {
                tracing::warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    "attempt failed: {err}; retrying"
                );
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_categorization() {
        assert_eq!(
            SyncError::Connection("refused".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            SyncError::config("port missing").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            SyncError::NotRegistered("doc".into()).category(),
            ErrorCategory::Caller
        );
        let conflict = SyncError::VersionConflict {
            document_id: "doc1".into(),
            edit_version: 5,
            shadow_version: 1,
        };
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
        assert!(conflict.to_string().contains("version 5"));
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(!SyncError::MalformedEdit("x".into()).is_retryable());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);

        let no_retry = RetryPolicy::no_retry();
        assert_eq!(no_retry.max_attempts, 1);

        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_network_errors_until_success() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = with_retry(&policy, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::Connection("refused".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_configuration_errors() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::config("no host"))
        })
        .await;

        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
