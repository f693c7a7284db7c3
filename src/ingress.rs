use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    clients::{
        database::RecordStore,
        rbmq::MessagePublisher,
        redis::{IdempotencyStore, idempotency_key},
        template::TemplateDirectory,
        user::UserDirectory,
    },
    error::NotificationError,
    models::{
        message::{NotificationRequest, QueueMessage},
        record::NotificationRecord,
        status::{AdmitResult, NotificationStatus},
    },
};

/// Entry point for new notification requests.
///
/// A request id is admitted at most once per idempotency TTL: repeats get the
/// first result back without being validated or published again.
pub struct IngressGate {
    idempotency: Arc<dyn IdempotencyStore>,
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateDirectory>,
    records: Arc<dyn RecordStore>,
    publisher: Arc<dyn MessagePublisher>,
    idempotency_service: String,
}

impl IngressGate {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        users: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateDirectory>,
        records: Arc<dyn RecordStore>,
        publisher: Arc<dyn MessagePublisher>,
        idempotency_service: impl Into<String>,
    ) -> Self {
        Self {
            idempotency,
            users,
            templates,
            records,
            publisher,
            idempotency_service: idempotency_service.into(),
        }
    }

    pub async fn admit(
        &self,
        request: NotificationRequest,
        correlation_id: &str,
    ) -> Result<AdmitResult, NotificationError> {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = info_span!(
            "admit",
            request_id = %request_id,
            correlation_id,
            channel = %request.channel
        );

        self.admit_once(request_id, request).instrument(span).await
    }

    async fn admit_once(
        &self,
        request_id: String,
        request: NotificationRequest,
    ) -> Result<AdmitResult, NotificationError> {
        let key = idempotency_key(&self.idempotency_service, &request_id);
        let result = AdmitResult {
            notification_id: request_id.clone(),
            status: NotificationStatus::Pending,
        };

        let claim = serde_json::to_value(&result)
            .map_err(|e| NotificationError::Malformed(e.to_string()))?;

        let cached = self
            .idempotency
            .check_and_store(&key, &claim)
            .await
            .map_err(|e| NotificationError::transient("redis", e))?;

        if let Some(cached) = cached {
            info!("Duplicate request, returning cached result");
            return match serde_json::from_value::<AdmitResult>(cached) {
                Ok(previous) => Ok(previous),
                Err(e) => {
                    warn!(error = %e, "Cached admission result unreadable");
                    Ok(result)
                }
            };
        }

        match self.admit_new(&request_id, &request).await {
            Ok(()) => {
                info!(user_id = %request.user_id, "Notification admitted");
                Ok(result)
            }
            Err(e) => {
                if let Err(release_err) = self.idempotency.release(&key).await {
                    warn!(error = %release_err, "Failed to release idempotency claim");
                }
                warn!(error = %e, "Notification rejected");
                Err(e)
            }
        }
    }

    async fn admit_new(
        &self,
        request_id: &str,
        request: &NotificationRequest,
    ) -> Result<(), NotificationError> {
        if self.users.get_user(&request.user_id).await?.is_none() {
            return Err(NotificationError::validation(format!(
                "user {} not found",
                request.user_id
            )));
        }

        let template = self
            .templates
            .get_template(&request.template_code)
            .await?
            .ok_or_else(|| {
                NotificationError::validation(format!(
                    "template {} not found",
                    request.template_code
                ))
            })?;

        if template.channel != request.channel {
            return Err(NotificationError::validation(format!(
                "template {} is for {} notifications, not {}",
                template.code, template.channel, request.channel
            )));
        }

        let record = NotificationRecord::pending(
            request_id.to_string(),
            request.user_id.clone(),
            request.channel,
            request.template_code.clone(),
            request.priority,
            request.metadata.clone(),
        );

        let inserted = self
            .records
            .create_pending(&record)
            .await
            .map_err(|e| NotificationError::transient("database", e))?;
        debug!(inserted, "Pending record stored");

        let message = QueueMessage::from_request(request_id.to_string(), request);
        self.publisher
            .publish(request.channel, &message)
            .await
            .map_err(|e| NotificationError::transient("rabbitmq", e))?;

        Ok(())
    }
}
