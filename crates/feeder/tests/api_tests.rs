//! Integration tests for the feeder API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use feeder_lib::{
    health::{components, HealthRegistry},
    observability::{FeederMetrics, StructuredLogger},
    Reconciler, Registry,
};
use sd_feeder::api::{create_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::FILE_SD_WRITER).await;

    let state = Arc::new(AppState::new(
        Arc::new(Registry::new()),
        health_registry,
        FeederMetrics::new(),
        StructuredLogger::new("test-node"),
    ));
    let router = create_router(state.clone());

    (router, state)
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_register_accepts_valid_body() {
    let (app, state) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/client",
            r#"{"targets": ["10.0.0.1:9100"], "labels": {"app": "svc-a", "instance_name": "a-1"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());

    let snapshot = state.registry.snapshot().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].labels.app, "svc-a");
    assert_eq!(snapshot[0].instance_name(), Some("a-1"));
}

#[tokio::test]
async fn test_register_missing_app_names_field() {
    let (app, state) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/client",
            r#"{"targets": ["10.0.0.1:9100"], "labels": {"instance_name": "a-1"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["field"], "labels.app");
    assert_eq!(body["error"], "`labels.app` is required");
    assert!(state.registry.is_empty().unwrap());
}

#[tokio::test]
async fn test_register_missing_targets_names_field() {
    let (app, state) = setup_test_app().await;

    let response = app
        .oneshot(post_json("/client", r#"{"labels": {"app": "svc-a"}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["field"], "targets");
    assert!(state.registry.is_empty().unwrap());
}

#[tokio::test]
async fn test_register_empty_targets_names_field() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/client",
            r#"{"targets": [], "labels": {"app": "svc-a"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "targets");
}

#[tokio::test]
async fn test_register_malformed_body() {
    let (app, state) = setup_test_app().await;

    let response = app
        .oneshot(post_json("/client", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
    assert!(body.get("field").is_none());
    assert!(state.registry.is_empty().unwrap());
}

#[tokio::test]
async fn test_register_wrong_field_type() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/client",
            r#"{"targets": "10.0.0.1:9100", "labels": {"app": "svc-a"}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_and_deregister() {
    let (app, state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/client",
            r#"{"targets": ["10.0.0.1:9100"], "labels": {"app": "svc-a", "instance_name": "a-1"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(request("GET", "/client")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed[0]["labels"]["app"], "svc-a");
    assert_eq!(listed[0]["targets"][0], "10.0.0.1:9100");

    // Wrong instance name does not match
    let response = app
        .clone()
        .oneshot(request("DELETE", "/client/svc-a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(request("DELETE", "/client/svc-a?instance_name=a-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.registry.is_empty().unwrap());
}

#[tokio::test]
async fn test_registration_reaches_next_cycle() {
    let (app, state) = setup_test_app().await;
    let (mut reconciler, _rx) =
        Reconciler::new(state.registry.clone(), Default::default());

    let response = app
        .oneshot(post_json(
            "/client",
            r#"{"targets": ["10.0.0.1:9100", "10.0.0.2:9100"], "labels": {"app": "svc-a", "metrics_path": "/stats"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = reconciler.reconcile().unwrap();
    assert_eq!(report.live, 1);
    let group = &report.groups[0];
    assert_eq!(group.source, "10.0.0.1:9100/stats");
    assert_eq!(group.labels["__meta_app"], "svc-a");
    assert_eq!(group.labels["__metrics_path__"], "/stats");
    assert_eq!(group.targets.len(), 2);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::RECONCILER, "registry unavailable")
        .await;

    let response = app.oneshot(request("GET", "/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::FILE_SD_WRITER, "permission denied")
        .await;

    let response = app.oneshot(request("GET", "/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let health = body_json(response).await;
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"]["file_sd_writer"]["message"],
        "permission denied"
    );
}

#[tokio::test]
async fn test_readyz_until_initialized() {
    let (app, state) = setup_test_app().await;

    let response = app.clone().oneshot(request("GET", "/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    state.health_registry.set_ready(true).await;

    let response = app.oneshot(request("GET", "/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/client",
            r#"{"targets": ["10.0.0.1:9100"], "labels": {"app": "svc-a"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("GET", "/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sd_feeder_registrations_total"));
    assert!(text.contains("sd_feeder_registered_agents"));
}
