//! 🏷️ The error kinds somebody actually has to branch on.
//!
//! Everything else in pmx is `anyhow` with a `.context(...)` chain, like the rest of the
//! codebase. These two enums exist because the retry executor needs to know "try again"
//! from "stop calling", and the orchestrator needs to know "your config is wrong" from
//! "your data is wrong". Those are different bad days.

use std::time::Duration;

use thiserror::Error;

/// 📡 A failed conversation with a source or target store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// 🔌 The request never completed: DNS, TCP, TLS, reset. The network had a moment.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    /// 🐢 429. The store asked us to slow down. Politely, with a status code.
    #[error("throttled by the store (retry after {retry_after:?}): {message}")]
    Throttled {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("store returned server error {status}: {message}")]
    Server { status: u16, message: String },
    /// 🔒 401/403. Retrying bad credentials only makes the audit log longer.
    #[error("store rejected our credentials ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// 🔄 Transient kinds are worth another attempt; 4xx-class and decode failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transport(_)
                | StoreError::Timeout(_)
                | StoreError::Throttled { .. }
                | StoreError::Server { .. }
        )
    }

    /// 🚦 Map an HTTP status plus response body to the right kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => StoreError::Auth { status, message },
            408 => StoreError::Timeout(message),
            429 => StoreError::Throttled {
                retry_after: None,
                message,
            },
            500..=599 => StoreError::Server { status, message },
            _ => StoreError::Rejected { status, message },
        }
    }

    /// 🔌 Translate a reqwest failure. Timeouts get their own kind; everything else that
    /// failed before a status came back is transport.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::from_status(status.as_u16(), err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

/// 🔧 Configuration problems. Fatal, and detected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    #[error("No schema declared for collection '{0}'")]
    UnknownCollection(String),
    #[error("No transformation rule table declared for collection '{0}'")]
    MissingRuleTable(String),
    #[error("Invalid configuration value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_status_codes_get_sorted_into_houses() {
        assert!(matches!(StoreError::from_status(401, "no"), StoreError::Auth { .. }));
        assert!(matches!(StoreError::from_status(403, "no"), StoreError::Auth { .. }));
        assert!(matches!(StoreError::from_status(408, "slow"), StoreError::Timeout(_)));
        assert!(matches!(StoreError::from_status(429, "easy"), StoreError::Throttled { .. }));
        assert!(matches!(StoreError::from_status(503, "down"), StoreError::Server { .. }));
        assert!(matches!(StoreError::from_status(400, "bad"), StoreError::Rejected { .. }));
    }

    #[test]
    fn the_one_where_only_transient_errors_get_a_second_chance() {
        assert!(StoreError::Transport("reset".into()).is_retryable());
        assert!(StoreError::from_status(429, "slow down").is_retryable());
        assert!(StoreError::from_status(502, "bad gateway").is_retryable());
        assert!(!StoreError::from_status(401, "who are you").is_retryable());
        assert!(!StoreError::from_status(404, "gone").is_retryable());
        assert!(!StoreError::Decode("garbage".into()).is_retryable());
    }

    #[test]
    fn the_one_where_every_missing_key_is_named() {
        let err = ConfigError::MissingKeys(vec![
            "target.Gateway.database".into(),
            "migration.retry_attempts".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required configuration: target.Gateway.database, migration.retry_attempts"
        );
    }
}
