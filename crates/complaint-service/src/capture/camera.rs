//! Camera device access.
//!
//! A [`CameraBackend`] enumerates video inputs and opens one as a
//! [`VideoStream`]. [`SharedCamera`] wraps the backend so that only one form
//! session at a time holds an open stream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::CameraConfig;
use crate::error::{ComplaintError, ComplaintResult};

/// A video input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDevice {
    pub id: String,
    pub label: String,
}

impl VideoDevice {
    pub fn is_back_facing(&self) -> bool {
        self.label.to_lowercase().contains("back")
    }
}

/// A live stream from one device
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Grab the current frame
    async fn snapshot(&mut self) -> Result<DynamicImage>;

    /// Release the device; must be idempotent
    fn stop(&mut self);
}

#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// List video inputs. `CameraUnsupported` when the host has no camera
    /// capability at all.
    async fn enumerate(&self) -> ComplaintResult<Vec<VideoDevice>>;

    async fn open(&self, device: &VideoDevice) -> ComplaintResult<Box<dyn VideoStream>>;
}

/// Exclusive claim on the camera, released on drop
pub struct CameraClaim {
    in_use: Arc<AtomicBool>,
}

impl Drop for CameraClaim {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

/// The host camera, shared by all sessions but open in at most one
#[derive(Clone)]
pub struct SharedCamera {
    backend: Option<Arc<dyn CameraBackend>>,
    in_use: Arc<AtomicBool>,
}

impl SharedCamera {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend: Some(backend),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A host without any camera capability
    pub fn unsupported() -> Self {
        Self {
            backend: None,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    pub async fn enumerate(&self) -> ComplaintResult<Vec<VideoDevice>> {
        match &self.backend {
            Some(backend) => backend.enumerate().await,
            None => Err(ComplaintError::CameraUnsupported),
        }
    }

    /// Open `device`, failing with `CameraAccess` if another session holds it
    pub async fn open(
        &self,
        device: &VideoDevice,
    ) -> ComplaintResult<(Box<dyn VideoStream>, CameraClaim)> {
        let backend = self
            .backend
            .as_ref()
            .ok_or(ComplaintError::CameraUnsupported)?;

        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ComplaintError::CameraAccess(
                "camera is in use by another session".to_string(),
            ));
        }
        let claim = CameraClaim {
            in_use: self.in_use.clone(),
        };

        // claim is dropped (and the camera freed) if opening fails
        let stream = backend.open(device).await?;
        Ok((stream, claim))
    }
}

/// Video4Linux cameras, one frame grabbed per snapshot through ffmpeg
pub struct V4l2Camera {
    config: CameraConfig,
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraBackend for V4l2Camera {
    async fn enumerate(&self) -> ComplaintResult<Vec<VideoDevice>> {
        let mut entries = match tokio::fs::read_dir(&self.config.sysfs_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ComplaintError::CameraUnsupported)
            }
            Err(e) => {
                return Err(ComplaintError::CameraAccess(format!(
                    "failed to list video devices: {}",
                    e
                )))
            }
        };

        let mut devices = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(ComplaintError::CameraAccess(format!(
                        "failed to list video devices: {}",
                        e
                    )))
                }
            };
            let id = entry.file_name().to_string_lossy().to_string();
            if !id.starts_with("video") {
                continue;
            }
            let label = tokio::fs::read_to_string(entry.path().join("name"))
                .await
                .map(|name| name.trim().to_string())
                .unwrap_or_default();
            devices.push(VideoDevice { id, label });
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(count = devices.len(), "enumerated video devices");
        Ok(devices)
    }

    async fn open(&self, device: &VideoDevice) -> ComplaintResult<Box<dyn VideoStream>> {
        let path = self.config.dev_root.join(&device.id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ComplaintError::CameraAccess(format!(
                "device node {} does not exist",
                path.display()
            )));
        }
        Ok(Box::new(FfmpegStream {
            path,
            ffmpeg_bin: self.config.ffmpeg_bin.clone(),
            stopped: false,
        }))
    }
}

struct FfmpegStream {
    path: PathBuf,
    ffmpeg_bin: String,
    stopped: bool,
}

#[async_trait]
impl VideoStream for FfmpegStream {
    async fn snapshot(&mut self) -> Result<DynamicImage> {
        if self.stopped {
            anyhow::bail!("stream for {} was stopped", self.path.display());
        }

        let device = self.path.to_string_lossy().to_string();
        let args = [
            "-hide_banner",
            "-f",
            "v4l2",
            "-i",
            device.as_str(),
            "-vframes",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "png",
            "pipe:1",
        ];
        debug!(args = ?args, "spawning ffmpeg for camera snapshot");

        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .context("failed to execute ffmpeg")?;

        if !output.status.success() {
            error!(device = %device, status = ?output.status, "ffmpeg snapshot failed");
            anyhow::bail!("ffmpeg exited with error: {:?}", output.status);
        }
        if output.stdout.is_empty() {
            anyhow::bail!("ffmpeg returned no frame data");
        }

        image::load_from_memory(&output.stdout).context("failed to decode camera frame")
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
