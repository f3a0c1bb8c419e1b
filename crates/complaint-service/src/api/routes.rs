use crate::error::{ComplaintError, ComplaintResult};
use crate::state::ComplaintServiceState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use common::complaints::{
    CameraStartResponse, CaptureRequest, CaptureResponse, ModelInfo, SessionCreatedResponse,
    SessionView, SubmissionReceipt, UpdateFieldsRequest, UploadRequest, ValidationReport,
};
use common::validation::parse_uuid;
use serde_json::json;
use uuid::Uuid;

fn session_id(raw: &str) -> ComplaintResult<Uuid> {
    parse_uuid(raw, "session id").map_err(ComplaintError::invalid_input)
}

// ===== Health & Metrics =====

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "complaint-service"
        })),
    )
}

/// Ready once the classifier is loaded
pub async fn readyz(State(state): State<ComplaintServiceState>) -> impl IntoResponse {
    if state.is_ready().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "node_id": state.node_id()
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "node_id": state.node_id()
            })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::gather_text() {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

pub async fn model_info(
    State(state): State<ComplaintServiceState>,
) -> ComplaintResult<Json<ModelInfo>> {
    Ok(Json(state.model_info()?))
}

// ===== Sessions =====

pub async fn create_session(State(state): State<ComplaintServiceState>) -> impl IntoResponse {
    let session_id = state.create_session().await;
    (StatusCode::CREATED, Json(SessionCreatedResponse { session_id }))
}

pub async fn get_session(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<Json<SessionView>> {
    let view = state.session_view(session_id(&id)?).await?;
    Ok(Json(view))
}

pub async fn end_session(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<StatusCode> {
    state.end_session(session_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_fields(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateFieldsRequest>,
) -> ComplaintResult<Json<SessionView>> {
    let view = state.update_fields(session_id(&id)?, request).await?;
    Ok(Json(view))
}

// ===== Camera & images =====

pub async fn start_camera(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<Json<CameraStartResponse>> {
    let device = state.start_camera(session_id(&id)?).await?;
    Ok(Json(device))
}

pub async fn stop_camera(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<Json<SessionView>> {
    let view = state.stop_camera(session_id(&id)?).await?;
    Ok(Json(view))
}

/// Capture a frame; the body (with an optional client position) may be omitted
/// but must be valid JSON when present
pub async fn capture(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ComplaintResult<(StatusCode, Json<CaptureResponse>)> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CaptureRequest::default()
    } else {
        serde_json::from_slice::<CaptureRequest>(&body).map_err(|e| {
            ComplaintError::InvalidInput(format!("malformed capture request: {}", e))
        })?
    };
    let response = state.capture(session_id(&id)?, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn upload(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> ComplaintResult<(StatusCode, Json<CaptureResponse>)> {
    let response = state.upload(session_id(&id)?, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_image(
    State(state): State<ComplaintServiceState>,
    Path((id, index)): Path<(String, usize)>,
) -> ComplaintResult<impl IntoResponse> {
    let png = state.image_png(session_id(&id)?, index).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

pub async fn remove_image(
    State(state): State<ComplaintServiceState>,
    Path((id, index)): Path<(String, usize)>,
) -> ComplaintResult<Json<SessionView>> {
    let view = state.remove_image(session_id(&id)?, index).await?;
    Ok(Json(view))
}

// ===== Validation & submission =====

pub async fn validate(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<Json<ValidationReport>> {
    let report = state.validate(session_id(&id)?).await?;
    Ok(Json(report))
}

pub async fn submit(
    State(state): State<ComplaintServiceState>,
    Path(id): Path<String>,
) -> ComplaintResult<Json<SubmissionReceipt>> {
    let receipt = state.submit(session_id(&id)?).await?;
    Ok(Json(receipt))
}
