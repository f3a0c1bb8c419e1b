use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Every failure a form session can report to its user.
///
/// Errors are recoverable: the operation that produced one records its
/// message in the session's error slot and the form stays usable.
#[derive(Debug, Clone, Error)]
pub enum ComplaintError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("camera access is not supported on this device")]
    CameraUnsupported,

    #[error("no back camera device found")]
    NoBackCamera,

    #[error("unable to access the camera: {0}")]
    CameraAccess(String),

    #[error("failed to access location: {0}")]
    LocationUnavailable(String),

    #[error("failed to get the address: {0}")]
    Geocode(String),

    #[error("{0}")]
    InsufficientInput(String),

    #[error("error during validation: {0}")]
    Validation(String),

    #[error("image must be validated first")]
    NotValidated,

    #[error("validation already in progress")]
    ValidationInProgress,

    #[error("images changed during validation, validate again")]
    ImagesChanged,

    #[error("session '{0}' not found")]
    SessionNotFound(Uuid),

    #[error("image {0} not found")]
    ImageNotFound(usize),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ComplaintError {
    pub fn too_few_images() -> Self {
        Self::InsufficientInput("please capture at least two images".to_string())
    }

    pub fn classifier_missing() -> Self {
        Self::InsufficientInput("image classifier is not loaded".to_string())
    }

    pub fn invalid_input(err: anyhow::Error) -> Self {
        Self::InvalidInput(format!("{err:#}"))
    }

    /// Stable machine-readable name for the error
    pub fn kind(&self) -> &'static str {
        match self {
            ComplaintError::ModelLoad(_) => "model_load",
            ComplaintError::CameraUnsupported => "camera_unsupported",
            ComplaintError::NoBackCamera => "no_back_camera",
            ComplaintError::CameraAccess(_) => "camera_access",
            ComplaintError::LocationUnavailable(_) => "location_unavailable",
            ComplaintError::Geocode(_) => "geocode",
            ComplaintError::InsufficientInput(_) => "insufficient_input",
            ComplaintError::Validation(_) => "validation",
            ComplaintError::NotValidated => "not_validated",
            ComplaintError::ValidationInProgress => "validation_in_progress",
            ComplaintError::ImagesChanged => "images_changed",
            ComplaintError::SessionNotFound(_) => "session_not_found",
            ComplaintError::ImageNotFound(_) => "image_not_found",
            ComplaintError::InvalidInput(_) => "invalid_input",
            ComplaintError::Internal(_) => "internal",
        }
    }

    /// Whether the error belongs in the session's user-visible error slot
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ComplaintError::SessionNotFound(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            ComplaintError::SessionNotFound(_) | ComplaintError::ImageNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ComplaintError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ComplaintError::ValidationInProgress
            | ComplaintError::ImagesChanged
            | ComplaintError::CameraAccess(_) => StatusCode::CONFLICT,
            ComplaintError::InsufficientInput(_)
            | ComplaintError::NotValidated
            | ComplaintError::NoBackCamera
            | ComplaintError::LocationUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ComplaintError::ModelLoad(_) | ComplaintError::CameraUnsupported => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ComplaintError::Geocode(_) => StatusCode::BAD_GATEWAY,
            ComplaintError::Validation(_) | ComplaintError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ComplaintError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (self.status(), body).into_response()
    }
}

pub type ComplaintResult<T> = std::result::Result<T, ComplaintError>;
