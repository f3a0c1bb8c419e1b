use anyhow::{Context, Result};
use async_trait::async_trait;
use common::complaints::GeoLocation;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::config::GeocodeConfig;
use crate::error::{ComplaintError, ComplaintResult};

/// Resolves coordinates to a human-readable address
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, location: GeoLocation) -> ComplaintResult<String>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
}

/// LocationIQ-compatible reverse geocoding over HTTP
pub struct LocationIqGeocoder {
    base: Url,
    api_key: String,
    client: reqwest::Client,
}

impl LocationIqGeocoder {
    pub fn new(config: GeocodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base: config.base_url,
            api_key: config.api_key,
            client,
        })
    }

    fn endpoint(&self) -> Result<Url> {
        self.base
            .join("v1/reverse.php")
            .context("invalid geocoding endpoint")
    }

    async fn lookup(&self, location: GeoLocation) -> Result<Option<String>> {
        let url = self.endpoint()?;
        let lat = location.lat.to_string();
        let lon = location.lng.to_string();
        let resp = self
            .client
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .context("reverse geocoding request failed")?;
        let resp = resp
            .error_for_status()
            .context("reverse geocoding returned error status")?;
        let body: ReverseResponse = resp
            .json()
            .await
            .context("failed to parse reverse geocoding response")?;
        Ok(body.display_name.filter(|name| !name.trim().is_empty()))
    }
}

#[async_trait]
impl Geocoder for LocationIqGeocoder {
    #[instrument(skip_all, fields(lat = location.lat, lng = location.lng))]
    async fn reverse_geocode(&self, location: GeoLocation) -> ComplaintResult<String> {
        let outcome = self.lookup(location).await;
        let status = match &outcome {
            Ok(Some(_)) => "success",
            Ok(None) => "empty",
            Err(_) => "error",
        };
        telemetry::metrics::GEOCODE_REQUESTS
            .with_label_values(&[status])
            .inc();

        match outcome {
            Ok(Some(address)) => Ok(address),
            Ok(None) => Err(ComplaintError::Geocode(
                "response contained no address".to_string(),
            )),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "reverse geocoding failed");
                Err(ComplaintError::Geocode(format!("{e:#}")))
            }
        }
    }
}
