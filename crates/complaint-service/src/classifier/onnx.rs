/// Image classifier backed by an ONNX export of a Teachable-Machine style model
use super::{prepare_rgb, ClassPrediction, ImageClassifier};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use common::complaints::ModelInfo;
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODEL_FILE: &str = "model.onnx";
pub const METADATA_FILE: &str = "metadata.json";

const INTRA_THREADS: usize = 2;

/// Class metadata shipped next to the model weights
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub labels: Vec<String>,

    #[serde(default = "default_image_size")]
    pub image_size: u32,

    #[serde(default)]
    pub model_name: Option<String>,
}

fn default_image_size() -> u32 {
    224
}

pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    output_name: String,
    metadata: ModelMetadata,
}

impl OnnxClassifier {
    /// Fetch `model.onnx` and `metadata.json` from a directory or http(s) base URL
    pub async fn load(location: &str) -> Result<Self> {
        tracing::info!(location = %location, "loading classifier model");

        let metadata_bytes = fetch_artifact(location, METADATA_FILE).await?;
        let metadata: ModelMetadata =
            serde_json::from_slice(&metadata_bytes).context("invalid model metadata")?;
        if metadata.labels.is_empty() {
            bail!("model metadata lists no class labels");
        }
        if metadata.image_size == 0 {
            bail!("model metadata has a zero image size");
        }

        let model_bytes = fetch_artifact(location, MODEL_FILE).await?;
        let session = tokio::task::spawn_blocking(move || -> Result<Session> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(INTRA_THREADS)?
                .commit_from_memory(&model_bytes)?;
            Ok(session)
        })
        .await
        .context("model loading task failed")??;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("model declares no outputs")?;

        tracing::info!(
            model = metadata.model_name.as_deref().unwrap_or("unnamed"),
            classes = metadata.labels.len(),
            input_size = metadata.image_size,
            "classifier model loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            output_name,
            metadata,
        })
    }
}

/// NHWC float tensor normalised to `[-1, 1]`
pub fn to_input_tensor(image: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let rgb = prepare_rgb(image, size);
    let mut input = Array::zeros(IxDyn(&[1, size as usize, size as usize, 3]));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, y as usize, x as usize, channel]] = pixel[channel] as f32 / 127.5 - 1.0;
        }
    }
    input
}

async fn fetch_artifact(location: &str, file: &str) -> Result<Vec<u8>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let mut base = Url::parse(location).context("invalid model location URL")?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let url = base.join(file).context("invalid model artifact URL")?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let resp = client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("model server rejected {}", url))?;
        Ok(resp.bytes().await?.to_vec())
    } else {
        let path = Path::new(location).join(file);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

#[async_trait]
impl ImageClassifier for OnnxClassifier {
    fn id(&self) -> &'static str {
        "onnx"
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self
                .metadata
                .model_name
                .clone()
                .unwrap_or_else(|| "complaint-classifier".to_string()),
            labels: self.metadata.labels.clone(),
            class_count: self.metadata.labels.len(),
            input_size: self.metadata.image_size,
        }
    }

    fn input_size(&self) -> u32 {
        self.metadata.image_size
    }

    async fn predict(&self, image: &DynamicImage) -> Result<Vec<ClassPrediction>> {
        let input = to_input_tensor(image, self.metadata.image_size);
        let session = self.session.clone();
        let output_name = self.output_name.clone();

        let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let tensor = Value::from_array(input)?;
            let mut session = session
                .lock()
                .map_err(|e| anyhow!("classifier session lock poisoned: {}", e))?;
            let outputs = session.run(ort::inputs![tensor])?;
            let output = outputs
                .get(output_name.as_str())
                .context("no output tensor found")?;
            let (_, data) = output.try_extract_tensor::<f32>()?;
            Ok(data.to_vec())
        })
        .await
        .context("inference task failed")??;

        if scores.len() != self.metadata.labels.len() {
            bail!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.metadata.labels.len()
            );
        }

        Ok(self
            .metadata
            .labels
            .iter()
            .zip(scores)
            .map(|(label, probability)| ClassPrediction {
                label: label.clone(),
                probability,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_metadata_parsing() {
        let metadata: ModelMetadata = serde_json::from_value(serde_json::json!({
            "tfjsVersion": "1.3.1",
            "modelName": "tm-my-image-model",
            "labels": ["Garbage", "Damaged Road", "Other"],
            "imageSize": 224
        }))
        .unwrap();
        assert_eq!(metadata.labels.len(), 3);
        assert_eq!(metadata.model_name.as_deref(), Some("tm-my-image-model"));

        let minimal: ModelMetadata =
            serde_json::from_value(serde_json::json!({ "labels": ["a"] })).unwrap();
        assert_eq!(minimal.image_size, 224);
    }

    #[test]
    fn test_input_tensor_normalisation() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([0, 255, 0]));
        img.put_pixel(1, 2, Rgb([255, 0, 0]));
        let input = to_input_tensor(&DynamicImage::ImageRgb8(img), 4);

        assert_eq!(input.shape(), &[1, 4, 4, 3]);
        assert_eq!(input[[0, 0, 0, 0]], -1.0);
        assert_eq!(input[[0, 0, 0, 1]], 1.0);
        // pixel (x=1, y=2) lands at row 2, column 1
        assert_eq!(input[[0, 2, 1, 0]], 1.0);
        assert_eq!(input[[0, 2, 1, 1]], -1.0);
    }

    #[tokio::test]
    async fn test_load_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-model");
        let result = OnnxClassifier::load(missing.to_str().unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_empty_labels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), r#"{"labels": []}"#).unwrap();
        std::fs::write(dir.path().join(MODEL_FILE), b"not a model").unwrap();

        let err = OnnxClassifier::load(dir.path().to_str().unwrap())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no class labels"));
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"labels": ["Garbage", "Damaged Road", "Other"]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(MODEL_FILE), b"not a model").unwrap();

        assert!(OnnxClassifier::load(dir.path().to_str().unwrap()).await.is_err());
    }
}
