use async_trait::async_trait;
use common::complaints::GeoLocation;

use crate::error::{ComplaintError, ComplaintResult};

/// One-shot position reading taken when an image is captured
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> ComplaintResult<GeoLocation>;
}

/// Position configured for a fixed installation (e.g. a street kiosk)
pub struct ConfiguredGeolocator {
    position: Option<GeoLocation>,
}

impl ConfiguredGeolocator {
    pub fn new(position: Option<GeoLocation>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Geolocator for ConfiguredGeolocator {
    async fn current_position(&self) -> ComplaintResult<GeoLocation> {
        self.position.ok_or_else(|| {
            ComplaintError::LocationUnavailable("location is not available on this device".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_position() {
        let here = GeoLocation { lat: 28.61, lng: 77.21 };
        let geolocator = ConfiguredGeolocator::new(Some(here));
        assert_eq!(geolocator.current_position().await.unwrap(), here);
    }

    #[tokio::test]
    async fn test_no_position_is_unavailable() {
        let geolocator = ConfiguredGeolocator::new(None);
        assert!(matches!(
            geolocator.current_position().await,
            Err(ComplaintError::LocationUnavailable(_))
        ));
    }
}
