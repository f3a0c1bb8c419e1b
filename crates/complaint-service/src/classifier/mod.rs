pub mod mock;
pub mod onnx;

use anyhow::Result;
use async_trait::async_trait;
use common::complaints::{ModelInfo, IMAGE_SIZE};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::{ClassifierBackend, ComplaintServiceConfig};
use crate::error::{ComplaintError, ComplaintResult};

pub use mock::{MockClassifier, MockClassifierConfig};
pub use onnx::OnnxClassifier;

/// One class score produced by a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPrediction {
    pub label: String,
    /// Probability in `[0, 1]`
    pub probability: f32,
}

/// Core trait every image classifier backend implements
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Backend identifier used in logs and metrics (e.g., "onnx")
    fn id(&self) -> &'static str;

    /// Model name and class labels
    fn info(&self) -> ModelInfo;

    fn class_count(&self) -> usize {
        self.info().class_count
    }

    /// Edge length of the square input the model expects
    fn input_size(&self) -> u32 {
        IMAGE_SIZE
    }

    /// Score an image; one entry per class, in class-index order
    async fn predict(&self, image: &DynamicImage) -> Result<Vec<ClassPrediction>>;

    /// Health check - verify the classifier is operational
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Bring an image to the square RGB raster a model consumes
pub fn prepare_rgb(image: &DynamicImage, size: u32) -> RgbImage {
    if image.width() == size && image.height() == size {
        image.to_rgb8()
    } else {
        image
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8()
    }
}

/// Stable content hash of an image at the standard input size
pub fn image_fingerprint(image: &DynamicImage) -> u64 {
    let rgb = prepare_rgb(image, IMAGE_SIZE);
    let mut hasher = DefaultHasher::new();
    rgb.as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Load the classifier selected by the configuration
pub async fn load(config: &ComplaintServiceConfig) -> ComplaintResult<Arc<dyn ImageClassifier>> {
    match config.classifier_backend {
        ClassifierBackend::Onnx => {
            let classifier = OnnxClassifier::load(&config.model_location)
                .await
                .map_err(|e| ComplaintError::ModelLoad(format!("{e:#}")))?;
            Ok(Arc::new(classifier))
        }
        ClassifierBackend::Mock => Ok(Arc::new(MockClassifier::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    #[test]
    fn test_prepare_rgb_resizes_to_square() {
        let prepared = prepare_rgb(&solid(640, 480, [10, 20, 30]), IMAGE_SIZE);
        assert_eq!(prepared.dimensions(), (IMAGE_SIZE, IMAGE_SIZE));
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let red = solid(IMAGE_SIZE, IMAGE_SIZE, [255, 0, 0]);
        let blue = solid(IMAGE_SIZE, IMAGE_SIZE, [0, 0, 255]);
        assert_eq!(image_fingerprint(&red), image_fingerprint(&red.clone()));
        assert_ne!(image_fingerprint(&red), image_fingerprint(&blue));
    }
}
