pub mod routes;

use crate::state::ComplaintServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use common::validation::MAX_UPLOAD_BYTES;
use tower_http::trace::TraceLayer;

/// Base64 inflates uploads by a third; leave room for the JSON envelope
const MAX_BODY_BYTES: usize = MAX_UPLOAD_BYTES / 3 * 4 + 64 * 1024;

/// Build the API router
pub fn router(state: ComplaintServiceState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        .route("/v1/model", get(routes::model_info))
        // Form sessions
        .route("/v1/sessions", post(routes::create_session))
        .route(
            "/v1/sessions/:id",
            get(routes::get_session).delete(routes::end_session),
        )
        .route("/v1/sessions/:id/fields", put(routes::update_fields))
        .route(
            "/v1/sessions/:id/camera",
            post(routes::start_camera).delete(routes::stop_camera),
        )
        .route("/v1/sessions/:id/captures", post(routes::capture))
        .route("/v1/sessions/:id/uploads", post(routes::upload))
        .route(
            "/v1/sessions/:id/images/:index",
            get(routes::get_image).delete(routes::remove_image),
        )
        .route("/v1/sessions/:id/validate", post(routes::validate))
        .route("/v1/sessions/:id/submit", post(routes::submit))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
