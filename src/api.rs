use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{database::RecordStore, health::HealthChecker},
    error::NotificationError,
    ingress::IngressGate,
    models::{
        health::HealthStatus, message::NotificationRequest, response::ApiResponse,
        status::StatusUpdate,
    },
    utils::shutdown_requested,
};

const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const SERVICE_TOKEN_HEADER: &str = "x-service-token";

pub struct AppState {
    pub health_checker: HealthChecker,
    pub ingress: IngressGate,
    pub records: Arc<dyn RecordStore>,
    pub service_token: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications", post(create_notification))
        .route("/api/v1/notifications/{id}/status", get(notification_status))
        .route("/internal/notifications/{id}/status", post(update_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    port: u16,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(address = %addr, "HTTP server started");

    serve(listener, state, shutdown).await
}

/// Serves until `shutdown` turns `true`, letting open requests finish.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await
        .map_err(|e| anyhow!("HTTP server failed: {}", e))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn create_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NotificationRequest>,
) -> Response {
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.ingress.admit(request, &correlation_id).await {
        Ok(result) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(result, "Notification accepted")),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                NotificationError::Validation(_) | NotificationError::Malformed(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                NotificationError::Transient { .. } | NotificationError::CircuitOpen { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            error_response(status, e.to_string(), "Notification rejected")
        }
    }
}

async fn notification_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.records.get(&id).await {
        Ok(Some(record)) => {
            (StatusCode::OK, Json(ApiResponse::success(record, "Notification found"))).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("notification {} not found", id),
            "Notification not found",
        ),
        Err(e) => {
            error!(request_id = %id, error = %e, "Failed to read notification record");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "Failed to read notification",
            )
        }
    }
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(update): Json<StatusUpdate>,
) -> Response {
    let token = headers
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if token != Some(state.service_token.as_str()) {
        warn!(request_id = %id, "Status update with invalid service token");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "invalid service token".to_string(),
            "Unauthorized",
        );
    }

    match state
        .records
        .update_status(&id, update.status, update.error.as_deref())
        .await
    {
        Ok(true) => {
            info!(request_id = %id, status = %update.status, "Notification status updated");
            (
                StatusCode::OK,
                Json(ApiResponse::success(update, "Status updated")),
            )
                .into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            format!("notification {} not found", id),
            "Notification not found",
        ),
        Err(e) => {
            error!(request_id = %id, error = %e, "Failed to update notification status");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "Failed to update status",
            )
        }
    }
}

fn error_response(status: StatusCode, error: String, message: &str) -> Response {
    (status, Json(ApiResponse::<()>::error(error, message))).into_response()
}
