use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, warn};

use crate::{
    config::Config,
    models::status::{NotificationStatus, StatusUpdate},
    utils::endpoint_url,
};

/// Pushes terminal delivery outcomes back to the record owner.
///
/// Reporting is best-effort: implementations log failures and return
/// normally, so a broken status endpoint never holds up acknowledgment.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, request_id: &str, status: NotificationStatus, error: Option<&str>);
}

pub struct HttpStatusReporter {
    http_client: Client,
    base_url: String,
    service_token: String,
}

impl HttpStatusReporter {
    pub fn new(config: &Config, http_client: Client) -> Self {
        Self {
            http_client,
            base_url: config.status_service_url.trim_end_matches('/').to_string(),
            service_token: config.service_token.clone(),
        }
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(&self, request_id: &str, status: NotificationStatus, error: Option<&str>) {
        let url = match endpoint_url(
            &self.base_url,
            &["internal", "notifications", request_id, "status"],
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!(request_id, status = %status, error = %e, "Failed to report status");
                return;
            }
        };
        let update = StatusUpdate {
            status,
            error: error.map(str::to_string),
            timestamp: Some(Utc::now()),
        };

        let result = self
            .http_client
            .post(url)
            .header("X-Service-Token", &self.service_token)
            .json(&update)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(request_id, status = %status, "Status reported");
            }
            Ok(response) => {
                warn!(
                    request_id,
                    status = %status,
                    http_status = response.status().as_u16(),
                    "Status endpoint rejected update"
                );
            }
            Err(e) => {
                warn!(request_id, status = %status, error = %e, "Failed to report status");
            }
        }
    }
}
