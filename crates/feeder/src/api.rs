//! HTTP API for agent registration, health checks and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use feeder_lib::{
    discovery::{RegisterError, Registry, ValidationError},
    health::{ComponentStatus, HealthRegistry},
    observability::{FeederMetrics, StructuredLogger},
    AgentRegistration, RegistrationKey,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub health_registry: HealthRegistry,
    pub metrics: FeederMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        health_registry: HealthRegistry,
        metrics: FeederMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            registry,
            health_registry,
            metrics,
            logger,
        }
    }
}

/// Errors returned to HTTP callers as JSON
#[derive(Debug)]
pub enum ApiError {
    /// Body could not be parsed
    BadRequest(String),
    Invalid(ValidationError),
    NotFound(String),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Invalid(e) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": e.to_string(), "field": e.field() }),
            ),
            ApiError::NotFound(key) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("no registration for `{key}`") }),
            ),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "registry unavailable" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Register or replace an agent
async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AgentRegistration>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(entry) = payload.map_err(|rejection| {
        state.metrics.inc_registration_rejections();
        state.logger.log_rejection("body", &rejection.body_text());
        ApiError::BadRequest(rejection.body_text())
    })?;

    let key = entry.key();
    let targets = entry.targets.len();

    match state.registry.register(entry) {
        Ok(replaced) => {
            state.metrics.inc_registrations();
            if let Ok(count) = state.registry.len() {
                state.metrics.set_registered_agents(count);
            }
            state
                .logger
                .log_registration(&key.to_string(), targets, replaced);
            Ok(StatusCode::OK)
        }
        Err(RegisterError::Invalid(e)) => {
            state.metrics.inc_registration_rejections();
            state.logger.log_rejection(e.field(), &e.to_string());
            Err(ApiError::Invalid(e))
        }
        Err(RegisterError::Unavailable) => {
            warn!(key = %key, "Registry unavailable, registration dropped");
            Err(ApiError::Unavailable)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeregisterParams {
    instance_name: Option<String>,
}

/// Withdraw a registration
async fn deregister(
    State(state): State<Arc<AppState>>,
    Path(app): Path<String>,
    Query(params): Query<DeregisterParams>,
) -> Result<StatusCode, ApiError> {
    let instance_name = params.instance_name.filter(|name| !name.is_empty());
    let key = RegistrationKey::new(app, instance_name.as_deref());

    match state.registry.deregister(&key) {
        Ok(Some(_)) => {
            if let Ok(count) = state.registry.len() {
                state.metrics.set_registered_agents(count);
            }
            state.logger.log_deregistration(&key.to_string());
            Ok(StatusCode::OK)
        }
        Ok(None) => Err(ApiError::NotFound(key.to_string())),
        Err(_) => Err(ApiError::Unavailable),
    }
}

/// Current registrations
async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentRegistration>>, ApiError> {
    state
        .registry
        .snapshot()
        .map(Json)
        .map_err(|_| ApiError::Unavailable)
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/client", get(list).post(register))
        .route("/client/:app", delete(deregister))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");
    Ok(listener)
}

/// Serve the API until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
