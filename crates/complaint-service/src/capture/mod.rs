//! Image acquisition for complaint drafts.
//!
//! The [`CaptureController`] walks the camera lifecycle
//! (`Idle → Requested → Active`) and turns live frames into fixed-size
//! [`CapturedImage`]s. Uploaded files become the same kind of image through
//! [`ImageSource::Upload`].

pub mod camera;
pub mod location;

use anyhow::{Context, Result};
use common::complaints::{CameraState, ImageSourceKind, ImageSummary, IMAGE_SIZE};
use common::validation::safe_unix_millis;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ComplaintError, ComplaintResult};
use camera::{CameraClaim, SharedCamera, VideoDevice, VideoStream};

pub use camera::{CameraBackend, V4l2Camera};
pub use location::{ConfiguredGeolocator, Geolocator};

/// Input that can become a complaint image
pub enum ImageSource {
    /// A frame grabbed from the live camera
    Camera(DynamicImage),
    /// Encoded file content supplied by the user
    Upload(Vec<u8>),
}

/// A 224×224 PNG snapshot owned by one form session
#[derive(Debug, Clone)]
pub struct CapturedImage {
    png: Arc<Vec<u8>>,
    source: ImageSourceKind,
    captured_at: u64,
}

impl CapturedImage {
    pub fn from_source(source: ImageSource) -> ComplaintResult<Self> {
        match source {
            ImageSource::Camera(frame) => Self::encode(&frame, ImageSourceKind::Camera)
                .map_err(|e| ComplaintError::CameraAccess(format!("{e:#}"))),
            ImageSource::Upload(bytes) => {
                let decoded = image::load_from_memory(&bytes).map_err(|e| {
                    ComplaintError::InvalidInput(format!("unreadable image upload: {}", e))
                })?;
                Self::encode(&decoded, ImageSourceKind::Upload)
                    .map_err(|e| ComplaintError::Internal(format!("{e:#}")))
            }
        }
    }

    /// [`CapturedImage::from_source`] on the blocking pool
    pub async fn from_source_blocking(source: ImageSource) -> ComplaintResult<Self> {
        tokio::task::spawn_blocking(move || Self::from_source(source))
            .await
            .map_err(|e| ComplaintError::Internal(format!("image encoding task failed: {}", e)))?
    }

    /// Stretch the frame onto the fixed raster and store it as PNG
    fn encode(frame: &DynamicImage, source: ImageSourceKind) -> Result<Self> {
        let raster = frame.resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(raster.to_rgba8())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("failed to encode image as PNG")?;
        Ok(Self {
            png: Arc::new(png),
            source,
            captured_at: safe_unix_millis(),
        })
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn source(&self) -> ImageSourceKind {
        self.source
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .context("failed to decode stored image")
    }

    pub fn summary(&self, index: usize) -> ImageSummary {
        ImageSummary {
            index,
            source: self.source,
            captured_at: self.captured_at,
            size_bytes: self.png.len(),
        }
    }
}

/// An open camera stream; the device is released on stop or drop
pub struct ActiveStream {
    device: VideoDevice,
    stream: Box<dyn VideoStream>,
    claim: Option<CameraClaim>,
}

impl ActiveStream {
    fn new(device: VideoDevice, stream: Box<dyn VideoStream>, claim: CameraClaim) -> Self {
        telemetry::metrics::CAMERA_ACTIVE_STREAMS.inc();
        Self {
            device,
            stream,
            claim: Some(claim),
        }
    }

    pub fn device(&self) -> &VideoDevice {
        &self.device
    }

    /// Stop all tracks and give the camera back. Idempotent.
    pub fn release(&mut self) {
        if let Some(claim) = self.claim.take() {
            self.stream.stop();
            drop(claim);
            telemetry::metrics::CAMERA_ACTIVE_STREAMS.dec();
            info!(device = %self.device.id, "camera stream released");
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct CaptureController {
    camera: SharedCamera,
    state: CameraState,
    stream: Option<ActiveStream>,
}

impl CaptureController {
    pub fn new(camera: SharedCamera) -> Self {
        Self {
            camera,
            state: CameraState::Idle,
            stream: None,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Select the back-facing camera and start streaming from it.
    ///
    /// A stream already open in this session is released first.
    pub async fn start(&mut self) -> ComplaintResult<VideoDevice> {
        self.stop();
        self.state = CameraState::Requested;

        match self.acquire().await {
            Ok(stream) => {
                let device = stream.device().clone();
                info!(device = %device.id, label = %device.label, "camera active");
                self.stream = Some(stream);
                self.state = CameraState::Active;
                Ok(device)
            }
            Err(e) => {
                warn!(error = %e, "camera start failed");
                self.state = CameraState::Idle;
                Err(e)
            }
        }
    }

    async fn acquire(&self) -> ComplaintResult<ActiveStream> {
        let devices = self.camera.enumerate().await?;
        let device = devices
            .into_iter()
            .find(VideoDevice::is_back_facing)
            .ok_or(ComplaintError::NoBackCamera)?;
        let (stream, claim) = self.camera.open(&device).await?;
        Ok(ActiveStream::new(device, stream, claim))
    }

    /// Grab the current frame as a complaint image.
    ///
    /// A failing stream is released and the controller returns to `Idle`.
    pub async fn capture(&mut self) -> ComplaintResult<CapturedImage> {
        let stream = match self.stream.as_mut() {
            Some(stream) if self.state == CameraState::Active => stream,
            _ => {
                return Err(ComplaintError::CameraAccess(
                    "camera is not started".to_string(),
                ))
            }
        };

        match stream.stream.snapshot().await {
            Ok(frame) => CapturedImage::from_source_blocking(ImageSource::Camera(frame)).await,
            Err(e) => {
                self.stop();
                Err(ComplaintError::CameraAccess(format!("{e:#}")))
            }
        }
    }

    /// Release the stream, if any, and return to `Idle`
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
        self.state = CameraState::Idle;
    }
}
