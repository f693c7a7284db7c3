use std::{collections::HashMap, sync::Arc};

use serde_json::json;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    clients::{
        redis::{IdempotencyStore, idempotency_key},
        sender::{DeliverySender, OutboundNotification},
        status::StatusReporter,
        template::TemplateDirectory,
        user::UserDirectory,
    },
    error::NotificationError,
    models::{
        message::{Channel, InboundMessage, QueueMessage},
        status::NotificationStatus,
        validation::validate_recipient,
    },
};

/// What the worker must do with a delivery once processing has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Put the message back on its queue carrying this retry count.
    Requeue { retry_count: u32 },
    /// Move the original body to the dead-letter queue.
    DeadLetter { reason: String },
}

/// Processes messages for one channel: dedupe, validate, render, deliver,
/// report, and decide the broker disposition.
pub struct ChannelConsumer {
    channel: Channel,
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateDirectory>,
    sender: Arc<dyn DeliverySender>,
    reporter: Arc<dyn StatusReporter>,
    dedupe: Arc<dyn IdempotencyStore>,
    max_redeliveries: u32,
}

impl ChannelConsumer {
    pub fn new(
        channel: Channel,
        users: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateDirectory>,
        sender: Arc<dyn DeliverySender>,
        reporter: Arc<dyn StatusReporter>,
        dedupe: Arc<dyn IdempotencyStore>,
        max_redeliveries: u32,
    ) -> Self {
        Self {
            channel,
            users,
            templates,
            sender,
            reporter,
            dedupe,
            max_redeliveries,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let queued = match serde_json::from_slice::<QueueMessage>(&message.body) {
            Ok(queued) => queued,
            Err(e) => {
                // Without a readable request id there is nobody to report to.
                error!(
                    channel = %self.channel,
                    delivery_tag = message.delivery_tag,
                    error = %NotificationError::Malformed(e.to_string()),
                    "Dropping unreadable message"
                );
                return Disposition::Ack;
            }
        };

        let span = info_span!(
            "notification",
            request_id = %queued.request_id,
            channel = %self.channel,
            retry_count = message.retry_count,
            redelivered = message.redelivered
        );

        self.process(&queued, message.retry_count)
            .instrument(span)
            .await
    }

    async fn process(&self, message: &QueueMessage, retry_count: u32) -> Disposition {
        let dedupe_key = idempotency_key(self.channel.service_name(), &message.request_id);

        match self.dedupe.is_duplicate(&dedupe_key).await {
            Ok(true) => {
                info!("Notification already delivered, skipping");
                return Disposition::Ack;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Idempotency check failed, processing anyway"),
        }

        info!(user_id = %message.user_id, "Processing notification");

        match self.deliver(message).await {
            Ok(()) => {
                let marker = json!({ "status": NotificationStatus::Delivered });
                if let Err(e) = self.dedupe.check_and_store(&dedupe_key, &marker).await {
                    warn!(error = %e, "Failed to remember delivered notification");
                }

                self.reporter
                    .report(&message.request_id, NotificationStatus::Delivered, None)
                    .await;

                info!("Notification delivered");
                Disposition::Ack
            }
            Err(e) => {
                let reason = e.to_string();
                self.reporter
                    .report(&message.request_id, NotificationStatus::Failed, Some(&reason))
                    .await;

                self.decide(&e, retry_count)
            }
        }
    }

    fn decide(&self, error: &NotificationError, retry_count: u32) -> Disposition {
        if !error.should_redeliver() {
            warn!(error = %error, "Notification failed permanently");
            return Disposition::Ack;
        }

        if retry_count < self.max_redeliveries {
            let next = retry_count + 1;
            warn!(error = %error, next_retry = next, "Notification failed, requeueing");
            Disposition::Requeue { retry_count: next }
        } else {
            error!(
                error = %error,
                max_redeliveries = self.max_redeliveries,
                "Redeliveries exhausted, dead-lettering"
            );
            Disposition::DeadLetter {
                reason: error.to_string(),
            }
        }
    }

    async fn deliver(&self, message: &QueueMessage) -> Result<(), NotificationError> {
        let user = self
            .users
            .get_user(&message.user_id)
            .await?
            .ok_or_else(|| {
                NotificationError::validation(format!("user {} not found", message.user_id))
            })?;

        let template = self
            .templates
            .get_template(&message.template_code)
            .await?
            .ok_or_else(|| {
                NotificationError::validation(format!(
                    "template {} not found",
                    message.template_code
                ))
            })?;

        if template.channel != self.channel {
            return Err(NotificationError::validation(format!(
                "template {} is for {} notifications, not {}",
                template.code, template.channel, self.channel
            )));
        }

        if !user.accepts(self.channel) {
            return Err(NotificationError::validation(format!(
                "user has {} notifications disabled",
                self.channel
            )));
        }

        let recipient = user.recipient(self.channel).ok_or_else(|| {
            NotificationError::validation(format!("user has no {} address", self.channel))
        })?;
        validate_recipient(self.channel, recipient)?;

        let rendered = template.render(&message.variables)?;
        debug!(template_code = %message.template_code, "Template rendered");

        let notification = OutboundNotification {
            request_id: message.request_id.clone(),
            recipient: recipient.to_string(),
            subject: rendered.subject,
            body: rendered.body,
            data: string_metadata(&message.metadata),
        };

        self.sender.send(&notification).await
    }
}

/// Provider payloads only carry string values.
fn string_metadata(metadata: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    metadata
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}
