use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    error::NotificationError,
    models::{message::Channel, retry::RetryConfig},
    utils::retry_with_backoff,
};

/// A rendered notification addressed to one recipient.
#[derive(Debug, Clone)]
pub struct OutboundNotification {
    pub request_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// Channel-specific delivery capability (FCM, SendGrid, ...).
#[async_trait]
pub trait DeliverySender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError>;
}

/// Wraps a sender so each attempt goes through the circuit breaker and the
/// attempts are spaced by the retry policy. An open circuit ends the retry
/// loop immediately.
pub struct ProtectedSender {
    inner: Arc<dyn DeliverySender>,
    breaker: Arc<CircuitBreaker>,
    retry_config: RetryConfig,
}

impl ProtectedSender {
    pub fn new(
        inner: Arc<dyn DeliverySender>,
        breaker: Arc<CircuitBreaker>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            inner,
            breaker,
            retry_config,
        }
    }
}

#[async_trait]
impl DeliverySender for ProtectedSender {
    fn channel(&self) -> Channel {
        self.inner.channel()
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError> {
        retry_with_backoff(&self.retry_config, || {
            self.breaker.call(|| self.inner.send(notification))
        })
        .await
    }
}

/// Stand-in used when no provider is configured for a channel.
pub struct LoggingSender {
    channel: Channel,
}

impl LoggingSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl DeliverySender for LoggingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError> {
        info!(
            request_id = %notification.request_id,
            channel = %self.channel,
            recipient = %notification.recipient,
            subject = %notification.subject,
            "No provider configured, notification logged instead of sent"
        );
        Ok(())
    }
}

/// Maps a provider HTTP status to the failure taxonomy: throttling and server
/// errors are transient, other client errors are permanent.
pub fn classify_status(service: &str, status: reqwest::StatusCode, body: &str) -> NotificationError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        NotificationError::transient(service, format!("status {}: {}", status, body))
    } else {
        NotificationError::validation(format!("{} rejected request with status {}: {}", service, status, body))
    }
}
