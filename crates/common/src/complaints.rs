//! Complaint form contracts shared between the service and its clients.
//!
//! These types describe form sessions, captured images, validation outcomes
//! and submission receipts as they travel over the HTTP API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed edge length of every stored complaint image, in pixels
pub const IMAGE_SIZE: u32 = 224;

/// Downstream view that takes over after a successful submission
pub const SUBMISSION_REDIRECT: &str = "/order";

/// A latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
}

/// Binary outcome of image validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Invalid,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Verdict plus the annotation a form displays for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub kind: Verdict,
    pub text: String,
    pub color: String,
}

impl From<Verdict> for PredictionResult {
    fn from(kind: Verdict) -> Self {
        let (text, color) = match kind {
            Verdict::Allowed => ("Allowed Image", "green"),
            Verdict::Invalid => ("Invalid Image", "red"),
        };
        Self {
            kind,
            text: text.to_string(),
            color: color.to_string(),
        }
    }
}

/// Where a complaint image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSourceKind {
    Camera,
    Upload,
}

/// Camera lifecycle as seen by a form session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Idle,
    Requested,
    Active,
}

/// Metadata about a stored image (the pixels are fetched separately)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub index: usize,
    pub source: ImageSourceKind,
    /// Capture time, Unix milliseconds
    pub captured_at: u64,
    pub size_bytes: usize,
}

/// Snapshot of a form session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub title: String,
    pub description: String,
    pub manual_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    pub images: Vec<ImageSummary>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub camera: CameraState,
    pub validating: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: Uuid,
}

/// Partial update of the text fields; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFieldsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStartResponse {
    pub device_id: String,
    pub label: String,
}

/// Capture request; `position` is a reading taken by the client device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoLocation>,
}

/// Image upload; `data` is the base64 encoded file content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub index: usize,
    pub image_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    /// Non-blocking problem during capture (e.g. no position available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Top class of one image and whether it counted toward the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageScore {
    pub index: usize,
    pub label: String,
    pub probability: f32,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub verdict: Verdict,
    /// Percentage-scale average over all images
    pub combined_score: f64,
    pub images: Vec<ImageScore>,
    pub result: PredictionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub complaint_id: Uuid,
    pub title: String,
    pub description: String,
    pub address: String,
    pub image_count: usize,
    pub submitted_at: u64,
    pub redirect: String,
}

/// Loaded classifier description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub labels: Vec<String>,
    pub class_count: usize,
    pub input_size: u32,
}
