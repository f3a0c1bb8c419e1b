/// Startup paths: classifier loading from configuration and real reverse
/// geocoding against a stub LocationIQ server
mod support;

use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use axum_test::TestServer;
use common::complaints::{GeoLocation, ModelInfo, SessionCreatedResponse};
use complaint_service::config::{ComplaintServiceConfig, GeocodeConfig};
use complaint_service::geocode::LocationIqGeocoder;
use complaint_service::{api, classifier, ComplaintError, ComplaintServiceState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use support::{session_path, upload, view, wait_for_view};
use tokio::net::TcpListener;

fn config(pairs: &[(&str, &str)]) -> ComplaintServiceConfig {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ComplaintServiceConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn open_session(server: &TestServer) -> uuid::Uuid {
    server
        .post("/v1/sessions")
        .await
        .json::<SessionCreatedResponse>()
        .session_id
}

#[tokio::test]
async fn test_missing_model_keeps_service_up_but_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().to_string_lossy().to_string();
    let config = config(&[("NODE_ID", "kiosk-7"), ("MODEL_LOCATION", &location)]);

    let error = match classifier::load(&config).await {
        Ok(_) => panic!("an empty directory must not load"),
        Err(e) => e,
    };
    assert!(matches!(error, ComplaintError::ModelLoad(_)));
    let message = error.to_string();

    let state = ComplaintServiceState::builder(config.node_id.clone())
        .model_error(error)
        .build();
    let server = TestServer::new(api::router(state)).unwrap();

    assert_eq!(server.get("/healthz").await.status_code(), 200);
    let response = server.get("/readyz").await;
    assert_eq!(response.status_code(), 503);
    let body: Value = response.json();
    assert_eq!(body["node_id"], "kiosk-7");

    let response = server.get("/v1/model").await;
    assert_eq!(response.status_code(), 503);
    let body: Value = response.json();
    assert_eq!(body["error"], message.as_str());

    // the load failure is shown to the user once, and validation is refused
    let id = open_session(&server).await;
    let shown = view(&server, id).await.last_error.unwrap();
    assert_eq!(shown, message);
    assert_eq!(shown.matches("failed to load model").count(), 1);

    for shade in [10, 20] {
        server
            .post(&format!("{}/uploads", session_path(id)))
            .json(&upload(shade, None))
            .await;
    }
    let response = server.post(&format!("{}/validate", session_path(id))).await;
    assert_eq!(response.status_code(), 422);
    let body: Value = response.json();
    assert_eq!(body["error"], "image classifier is not loaded");
}

#[tokio::test]
async fn test_mock_backend_from_configuration() {
    let config = config(&[
        ("NODE_ID", "kiosk-8"),
        ("CLASSIFIER_BACKEND", "mock"),
        ("ACCEPTED_LABELS", "Garbage"),
        ("ACCEPT_THRESHOLD", "60"),
    ]);
    let loaded = classifier::load(&config).await.unwrap();

    let state = ComplaintServiceState::builder(config.node_id.clone())
        .policy(config.validation.clone())
        .classifier(loaded)
        .build();
    assert_eq!(state.policy().accepted_labels, vec!["Garbage".to_string()]);
    assert_eq!(state.policy().threshold, 60.0);

    let server = TestServer::new(api::router(state)).unwrap();
    assert_eq!(server.get("/readyz").await.status_code(), 200);
    let model: ModelInfo = server.get("/v1/model").await.json();
    assert_eq!(model.name, "mock-classifier");
}

fn geocoder(base: &str) -> Arc<LocationIqGeocoder> {
    Arc::new(
        LocationIqGeocoder::new(GeocodeConfig {
            base_url: base.parse().unwrap(),
            api_key: "pk.integration".to_string(),
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn test_uploaded_position_is_reverse_geocoded() {
    let stub = Router::new().route(
        "/v1/reverse.php",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            if params.get("key").map(String::as_str) != Some("pk.integration") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(Json(serde_json::json!({
                "display_name": format!(
                    "Stub Street, {}, {}",
                    params.get("lat").cloned().unwrap_or_default(),
                    params.get("lon").cloned().unwrap_or_default()
                )
            })))
        }),
    );
    let base = spawn_stub(stub).await;

    let state = ComplaintServiceState::builder("test-node")
        .geocoder(geocoder(&base))
        .build();
    let server = TestServer::new(api::router(state)).unwrap();
    let id = open_session(&server).await;

    let response = server
        .post(&format!("{}/uploads", session_path(id)))
        .json(&upload(10, Some(GeoLocation { lat: 18.5, lng: 73.75 })))
        .await;
    assert_eq!(response.status_code(), 201);

    let current = wait_for_view(&server, id, |v| v.detected_address.is_some()).await;
    assert_eq!(
        current.detected_address.as_deref(),
        Some("Stub Street, 18.5, 73.75")
    );
    assert!(current.last_error.is_none());
}

#[tokio::test]
async fn test_geocode_failure_lands_in_error_slot() {
    let stub = Router::new().route(
        "/v1/reverse.php",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_stub(stub).await;

    let state = ComplaintServiceState::builder("test-node")
        .geocoder(geocoder(&base))
        .build();
    let server = TestServer::new(api::router(state)).unwrap();
    let id = open_session(&server).await;

    let response = server
        .post(&format!("{}/uploads", session_path(id)))
        .json(&upload(10, Some(GeoLocation { lat: 1.0, lng: 2.0 })))
        .await;
    assert_eq!(response.status_code(), 201);

    let current = wait_for_view(&server, id, |v| v.last_error.is_some()).await;
    assert!(current
        .last_error
        .unwrap()
        .starts_with("failed to get the address"));
    assert!(current.detected_address.is_none());
    assert_eq!(current.images.len(), 1);
}
