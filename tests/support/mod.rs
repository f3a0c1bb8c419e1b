//! Fakes shared by the integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::complaints::{GeoLocation, SessionView, UploadRequest};
use complaint_service::capture::camera::{CameraBackend, SharedCamera, VideoDevice, VideoStream};
use complaint_service::geocode::Geocoder;
use complaint_service::{ComplaintError, ComplaintResult};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Uniform frame; distinct shades get distinct classifier answers
pub fn frame(shade: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([shade, 255 - shade, 64])))
}

pub fn upload(shade: u8, position: Option<GeoLocation>) -> UploadRequest {
    let mut png = Vec::new();
    frame(shade)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    UploadRequest {
        data: STANDARD.encode(png),
        position,
    }
}

/// Camera whose current picture the test can change between captures
#[derive(Clone)]
pub struct FakeCamera {
    labels: Vec<String>,
    scene: Arc<Mutex<Option<DynamicImage>>>,
}

impl FakeCamera {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            scene: Arc::new(Mutex::new(Some(frame(0)))),
        }
    }

    pub fn back() -> Self {
        Self::new(&["Front Camera", "Back Camera"])
    }

    pub fn show(&self, shade: u8) {
        *self.scene.lock().unwrap() = Some(frame(shade));
    }

    pub fn unplug(&self) {
        *self.scene.lock().unwrap() = None;
    }

    pub fn shared(&self) -> SharedCamera {
        SharedCamera::new(Arc::new(self.clone()))
    }
}

struct FakeStream {
    scene: Arc<Mutex<Option<DynamicImage>>>,
}

#[async_trait]
impl VideoStream for FakeStream {
    async fn snapshot(&mut self) -> Result<DynamicImage> {
        self.scene
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("camera disconnected"))
    }

    fn stop(&mut self) {}
}

#[async_trait]
impl CameraBackend for FakeCamera {
    async fn enumerate(&self) -> ComplaintResult<Vec<VideoDevice>> {
        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| VideoDevice {
                id: format!("video{}", i),
                label: label.clone(),
            })
            .collect())
    }

    async fn open(&self, _device: &VideoDevice) -> ComplaintResult<Box<dyn VideoStream>> {
        Ok(Box::new(FakeStream {
            scene: self.scene.clone(),
        }))
    }
}

/// Geocoder that formats the coordinates, or fails on demand
pub struct FakeGeocoder {
    pub fail: bool,
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse_geocode(&self, location: GeoLocation) -> ComplaintResult<String> {
        if self.fail {
            return Err(ComplaintError::Geocode("upstream unavailable".to_string()));
        }
        Ok(format!("Near {:.2}, {:.2}", location.lat, location.lng))
    }
}

pub fn session_path(id: Uuid) -> String {
    format!("/v1/sessions/{}", id)
}

pub async fn view(server: &TestServer, id: Uuid) -> SessionView {
    server.get(&session_path(id)).await.json::<SessionView>()
}

/// Poll a session view until `done` holds or a second passes
pub async fn wait_for_view(
    server: &TestServer,
    id: Uuid,
    done: impl Fn(&SessionView) -> bool,
) -> SessionView {
    let mut current = view(server, id).await;
    for _ in 0..50 {
        if done(&current) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        current = view(server, id).await;
    }
    current
}
