use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig, message::Channel, retry::RetryConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    #[serde(default = "default_email_queue_name")]
    pub email_queue_name: String,
    #[serde(default = "default_push_queue_name")]
    pub push_queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_idempotency_service")]
    pub idempotency_service: String,

    pub database_url: String,

    #[serde(default = "default_user_service_url")]
    pub user_service_url: String,
    #[serde(default = "default_template_service_url")]
    pub template_service_url: String,
    #[serde(default = "default_status_service_url")]
    pub status_service_url: String,
    #[serde(default = "default_service_token")]
    pub service_token: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    pub fcm_project_id: Option<String>,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,

    pub sendgrid_api_key: Option<String>,
    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,

    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_seconds")]
    pub circuit_breaker_recovery_timeout_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_true")]
    pub enable_api: bool,
    #[serde(default = "default_true")]
    pub enable_email_consumer: bool,
    #[serde(default = "default_true")]
    pub enable_push_consumer: bool,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(anyhow!("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be at least 1"));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow!("RETRY_BACKOFF_MULTIPLIER must be >= 1.0"));
        }
        if !(0.0..1.0).contains(&self.retry_jitter) {
            return Err(anyhow!("RETRY_JITTER must be in [0.0, 1.0)"));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter: self.retry_jitter,
        }
    }

    pub fn circuit_breaker_config(&self, service_name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            service_name: service_name.to_string(),
            failure_threshold: self.circuit_breaker_failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_breaker_recovery_timeout_seconds),
        }
    }

    pub fn queue_name(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.email_queue_name,
            Channel::Push => &self.push_queue_name,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

fn default_exchange_name() -> String {
    "notifications.direct".to_string()
}

fn default_email_queue_name() -> String {
    "email.queue".to_string()
}

fn default_push_queue_name() -> String {
    "push.queue".to_string()
}

fn default_failed_queue_name() -> String {
    "failed.queue".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

fn default_max_redeliveries() -> u32 {
    3
}

fn default_idempotency_ttl_seconds() -> u64 {
    3600
}

fn default_idempotency_service() -> String {
    "notification".to_string()
}

fn default_user_service_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_template_service_url() -> String {
    "http://localhost:8004".to_string()
}

fn default_status_service_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_service_token() -> String {
    "internal-service-token".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    5
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_email_from() -> String {
    "noreply@example.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_seconds() -> u64 {
    60
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_server_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "text".to_string()
}
