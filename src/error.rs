//! Failure taxonomy for the delivery path.
//!
//! Every error raised while admitting or delivering a notification is one of
//! these variants. The consumer turns them into a broker disposition: transient
//! and circuit-open failures are redelivered, everything else is terminal.

use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("transient failure in {service}: {reason}")]
    Transient { service: String, reason: String },

    #[error("circuit breaker is open for {service}")]
    CircuitOpen { service: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl NotificationError {
    pub fn transient(service: impl Into<String>, reason: impl Display) -> Self {
        Self::Transient {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Whether the broker should see this message again.
    pub fn should_redeliver(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::CircuitOpen { .. })
    }

    /// Whether the failure says anything about the dependency's health.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Decides which failures `retry_with_backoff` is allowed to retry in-process.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for NotificationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
