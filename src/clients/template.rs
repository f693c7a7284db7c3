use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::NotificationError,
    models::{retry::RetryConfig, template::Template},
    utils::{endpoint_url, fetch_envelope, retry_with_backoff},
};

/// Read access to notification templates by code.
#[async_trait]
pub trait TemplateDirectory: Send + Sync {
    async fn get_template(&self, template_code: &str) -> Result<Option<Template>, NotificationError>;
}

pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
    service_token: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl TemplateServiceClient {
    pub fn new(config: &Config, http_client: Client, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        info!(base_url = %config.template_service_url, "Template service client initialized");

        Self {
            http_client,
            base_url: config.template_service_url.trim_end_matches('/').to_string(),
            service_token: config.service_token.clone(),
            retry_config: config.retry_config(),
            circuit_breaker,
        }
    }
}

#[async_trait]
impl TemplateDirectory for TemplateServiceClient {
    async fn get_template(&self, template_code: &str) -> Result<Option<Template>, NotificationError> {
        let url = endpoint_url(&self.base_url, &["api", "v1", "templates", template_code])
            .map_err(|e| NotificationError::transient(self.circuit_breaker.service_name(), e))?;
        debug!(template_code, "Fetching template from service");

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
