use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::sender::{DeliverySender, OutboundNotification, classify_status},
    config::Config,
    error::NotificationError,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest},
        message::Channel,
    },
};

const FCM_SERVICE: &str = "fcm";
const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Source of the OAuth bearer token for the FCM v1 API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, NotificationError>;
}

/// Google application default credentials.
pub struct GcpTokenSource {
    provider: Arc<dyn TokenProvider>,
}

impl GcpTokenSource {
    pub async fn discover() -> Result<Self, Error> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| anyhow!("Failed to load Google credentials: {}", e))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self) -> Result<String, NotificationError> {
        let token = self
            .provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| NotificationError::transient(FCM_SERVICE, format!("token fetch failed: {}", e)))?;
        Ok(token.as_str().to_string())
    }
}

/// Fixed token, for emulators and tests.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, NotificationError> {
        Ok(self.0.clone())
    }
}

pub struct FcmSender {
    http_client: Client,
    send_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FcmSender {
    pub fn new(
        http_client: Client,
        base_url: &str,
        project_id: &str,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            base_url.trim_end_matches('/'),
            project_id
        );

        info!(project_id, "FCM sender initialized");

        Self {
            http_client,
            send_url,
            tokens,
        }
    }

    pub async fn from_config(config: &Config, http_client: Client) -> Result<Self, Error> {
        let project_id = config
            .fcm_project_id
            .as_deref()
            .ok_or_else(|| anyhow!("FCM_PROJECT_ID is not set"))?;
        let tokens = GcpTokenSource::discover().await?;

        Ok(Self::new(
            http_client,
            &config.fcm_base_url,
            project_id,
            Arc::new(tokens),
        ))
    }
}

#[async_trait]
impl DeliverySender for FcmSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError> {
        debug!(request_id = %notification.request_id, "Sending FCM push notification");

        let mut data = notification.data.clone();
        data.insert("trace_id".to_string(), notification.request_id.clone());

        let request = FcmRequest {
            message: FcmMessage {
                token: notification.recipient.clone(),
                notification: FcmNotification {
                    title: notification.subject.clone(),
                    body: notification.body.clone(),
                },
                data: Some(data),
            },
        };

        let token = self.tokens.access_token().await?;

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::transient(FCM_SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            info!(request_id = %notification.request_id, "FCM push notification sent successfully");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(FCM_SERVICE, status, &body))
    }
}
