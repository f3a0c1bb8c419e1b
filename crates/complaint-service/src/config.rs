use anyhow::{anyhow, Context, Result};
use common::complaints::GeoLocation;
use common::validation::{validate_coordinates, validate_range};
use reqwest::Url;
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use crate::validation::ValidationPolicy;

pub const DEFAULT_GEOCODE_BASE_URL: &str = "https://us1.locationiq.com";
pub const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 900;

/// Which classifier implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// ONNX model + metadata loaded from `MODEL_LOCATION`
    Onnx,
    /// Deterministic classifier for demos and tests
    Mock,
}

#[derive(Debug, Clone)]
pub struct GeocodeConfig {
    pub base_url: Url,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// sysfs class directory listing video devices
    pub sysfs_root: PathBuf,
    /// Directory holding the device nodes
    pub dev_root: PathBuf,
    pub ffmpeg_bin: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/video4linux"),
            dev_root: PathBuf::from("/dev"),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComplaintServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: SocketAddr,

    /// Identifier of this kiosk / service instance
    pub node_id: String,

    /// Directory or http(s) URL holding `model.onnx` and `metadata.json`
    pub model_location: String,

    pub classifier_backend: ClassifierBackend,

    /// Reverse geocoding; disabled when no API key is configured
    pub geocode: Option<GeocodeConfig>,

    /// Fixed position of the device, if it has one
    pub device_location: Option<GeoLocation>,

    pub validation: ValidationPolicy,

    pub camera: CameraConfig,

    /// Sessions untouched for this long are closed and their camera released
    pub session_idle_ttl: Duration,
}

impl ComplaintServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = lookup("COMPLAINT_SERVICE_ADDR").unwrap_or_else(|| "0.0.0.0:8090".to_string());
        let bind_addr: SocketAddr = bind.parse().context("invalid COMPLAINT_SERVICE_ADDR")?;

        let node_id = lookup("NODE_ID").unwrap_or_else(|| {
            format!(
                "complaint-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let model_location = lookup("MODEL_LOCATION").unwrap_or_else(|| "./my_model/".to_string());

        let classifier_backend = match lookup("CLASSIFIER_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "onnx" => ClassifierBackend::Onnx,
            "mock" => ClassifierBackend::Mock,
            other => return Err(anyhow!("unknown CLASSIFIER_BACKEND '{}'", other)),
        };

        let geocode = match lookup("GEOCODE_API_KEY").filter(|k| !k.trim().is_empty()) {
            Some(api_key) => {
                let base = lookup("GEOCODE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GEOCODE_BASE_URL.to_string());
                let base_url = Url::parse(&base).context("invalid GEOCODE_BASE_URL")?;
                Some(GeocodeConfig { base_url, api_key })
            }
            None => None,
        };

        let device_location = match (lookup("DEVICE_LATITUDE"), lookup("DEVICE_LONGITUDE")) {
            (Some(lat), Some(lng)) => {
                let lat: f64 = lat.trim().parse().context("invalid DEVICE_LATITUDE")?;
                let lng: f64 = lng.trim().parse().context("invalid DEVICE_LONGITUDE")?;
                validate_coordinates(lat, lng).context("invalid device location")?;
                Some(GeoLocation { lat, lng })
            }
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "DEVICE_LATITUDE and DEVICE_LONGITUDE must be set together"
                ))
            }
        };

        let mut validation = ValidationPolicy::default();
        if let Some(labels) = lookup("ACCEPTED_LABELS") {
            let labels: Vec<String> = labels
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            if labels.is_empty() {
                return Err(anyhow!("ACCEPTED_LABELS must name at least one label"));
            }
            validation.accepted_labels = labels;
        }
        if let Some(threshold) = lookup("ACCEPT_THRESHOLD") {
            let threshold: f64 = threshold.trim().parse().context("invalid ACCEPT_THRESHOLD")?;
            validate_range(threshold, 0.0, 100.0, "ACCEPT_THRESHOLD")?;
            validation.threshold = threshold;
        }

        let mut camera = CameraConfig::default();
        if let Some(root) = lookup("VIDEO4LINUX_ROOT") {
            camera.sysfs_root = PathBuf::from(root);
        }
        if let Some(dev) = lookup("VIDEO_DEVICE_ROOT") {
            camera.dev_root = PathBuf::from(dev);
        }
        if let Some(bin) = lookup("FFMPEG_BIN") {
            camera.ffmpeg_bin = bin;
        }

        let idle_secs = match lookup("SESSION_IDLE_TTL_SECS") {
            Some(secs) => secs.trim().parse().context("invalid SESSION_IDLE_TTL_SECS")?,
            None => DEFAULT_SESSION_IDLE_TTL_SECS,
        };
        if idle_secs == 0 {
            return Err(anyhow!("SESSION_IDLE_TTL_SECS must be at least 1"));
        }

        Ok(Self {
            bind_addr,
            node_id,
            model_location,
            classifier_backend,
            geocode,
            device_location,
            validation,
            camera,
            session_idle_ttl: Duration::from_secs(idle_secs),
        })
    }
}
