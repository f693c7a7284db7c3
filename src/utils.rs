use std::fmt::Display;

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::{
    sync::watch,
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    clients::sender::classify_status,
    error::{NotificationError, Retryable},
    models::{response::ApiResponse, retry::RetryConfig},
};

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries have been spent. The last error is returned as is.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    info!(
                        attempt = retry + 1,
                        max_retries = config.max_retries,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                debug!(error = %e, "Operation failed with non-retryable error");
                return Err(e);
            }
            Err(e) => {
                if retry >= config.max_retries {
                    warn!(
                        attempts = retry + 1,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = jittered(config.delay_for_retry(retry), config.jitter);

                debug!(
                    attempt = retry + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                sleep(delay).await;
                retry += 1;
            }
        }
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }

    let factor = 1.0 + rand::random_range(-jitter..=jitter);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// Appends `segments` to `base`, percent-encoding each one, so caller-supplied
/// ids can never change the route.
pub fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, Error> {
    let mut url = Url::parse(base).map_err(|e| anyhow!("Invalid base URL {}: {}", base, e))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Base URL {} cannot carry a path", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// GETs an `ApiResponse` envelope from a collaborator service. A 404 or an
/// unsuccessful envelope is reported as `Ok(None)`.
pub async fn fetch_envelope<T: DeserializeOwned>(
    http_client: &Client,
    service: &str,
    url: &Url,
    service_token: &str,
) -> Result<Option<T>, NotificationError> {
    let response = http_client
        .get(url.clone())
        .header("X-Service-Token", service_token)
        .send()
        .await
        .map_err(|e| NotificationError::transient(service, e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| NotificationError::transient(service, format!("unreadable response: {}", e)))?;

    Ok(envelope.into_data())
}

/// Resolves once `shutdown` carries `true` or its sender has been dropped.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Installs the global subscriber. `format` is `json` or anything else for
/// human-readable output; the level comes from `RUST_LOG`.
pub fn init_tracing(format: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
