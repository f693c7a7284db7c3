use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::NotificationError,
    models::{retry::RetryConfig, user::UserProfile},
    utils::{endpoint_url, fetch_envelope, retry_with_backoff},
};

/// Read access to user contact details and channel preferences.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, NotificationError>;
}

pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
    service_token: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl UserServiceClient {
    pub fn new(config: &Config, http_client: Client, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        info!(base_url = %config.user_service_url, "User service client initialized");

        Self {
            http_client,
            base_url: config.user_service_url.trim_end_matches('/').to_string(),
            service_token: config.service_token.clone(),
            retry_config: config.retry_config(),
            circuit_breaker,
        }
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, NotificationError> {
        let url = endpoint_url(&self.base_url, &["internal", "users", user_id])
            .map_err(|e| NotificationError::transient(self.circuit_breaker.service_name(), e))?;
        debug!(user_id, "Fetching user profile");

        retry_with_backoff(&self.retry_config, || {
            self.circuit_breaker.call(|| {
                fetch_envelope(
                    &self.http_client,
                    self.circuit_breaker.service_name(),
                    &url,
                    &self.service_token,
                )
            })
        })
        .await
    }
}
