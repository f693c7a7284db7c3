use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{self, authentication::Credentials},
};
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::sender::{DeliverySender, OutboundNotification, classify_status},
    config::Config,
    error::NotificationError,
    models::{email::SendGridMail, message::Channel},
};

const SENDGRID_SERVICE: &str = "sendgrid";
const SMTP_SERVICE: &str = "smtp";

/// Email delivery through the SendGrid v3 API.
pub struct SendGridSender {
    http_client: Client,
    send_url: String,
    api_key: String,
    from: String,
}

impl SendGridSender {
    pub fn new(http_client: Client, base_url: &str, api_key: String, from: String) -> Self {
        info!(from = %from, "SendGrid sender initialized");

        Self {
            http_client,
            send_url: format!("{}/v3/mail/send", base_url.trim_end_matches('/')),
            api_key,
            from,
        }
    }

    pub fn from_config(config: &Config, http_client: Client) -> Result<Self, Error> {
        let api_key = config
            .sendgrid_api_key
            .clone()
            .ok_or_else(|| anyhow!("SENDGRID_API_KEY is not set"))?;

        Ok(Self::new(
            http_client,
            &config.sendgrid_base_url,
            api_key,
            config.email_from.clone(),
        ))
    }
}

#[async_trait]
impl DeliverySender for SendGridSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError> {
        debug!(request_id = %notification.request_id, "Sending email through SendGrid");

        let mail = SendGridMail::html(
            &self.from,
            &notification.recipient,
            &notification.subject,
            &notification.body,
        );

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(&self.api_key)
            .json(&mail)
            .send()
            .await
            .map_err(|e| NotificationError::transient(SENDGRID_SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            info!(request_id = %notification.request_id, "Email sent successfully");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(SENDGRID_SERVICE, status, &body))
    }
}

/// Email delivery over SMTP, used when no SendGrid key is configured.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    pub fn new(transport: AsyncSmtpTransport<Tokio1Executor>, from: &str) -> Result<Self, Error> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid EMAIL_FROM {}: {}", from, e))?;

        Ok(Self { transport, from })
    }

    /// STARTTLS relay on `SMTP_HOST:SMTP_PORT`, authenticated when both
    /// `SMTP_USER` and `SMTP_PASSWORD` are set.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow!("SMTP_HOST is not set"))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow!("Failed to set up SMTP relay {}: {}", host, e))?
            .port(config.smtp_port)
            .timeout(Some(config.http_timeout()));

        if let (Some(user), Some(password)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        info!(host, port = config.smtp_port, "SMTP sender initialized");
        Self::new(builder.build(), &config.email_from)
    }
}

#[async_trait]
impl DeliverySender for SmtpSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), NotificationError> {
        debug!(request_id = %notification.request_id, "Sending email over SMTP");

        let to = notification.recipient.parse::<Mailbox>().map_err(|e| {
            NotificationError::validation(format!("invalid recipient address: {}", e))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(notification.body.clone())
            .map_err(|e| NotificationError::validation(format!("unbuildable email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(classify_smtp_error)?;

        info!(request_id = %notification.request_id, "Email sent successfully");
        Ok(())
    }
}

/// 5xx replies are permanent rejections; everything else (4xx, network,
/// timeouts, TLS) is worth another attempt.
fn classify_smtp_error(error: smtp::Error) -> NotificationError {
    if error.is_permanent() {
        NotificationError::validation(format!("smtp rejected message: {}", error))
    } else {
        NotificationError::transient(SMTP_SERVICE, error)
    }
}
