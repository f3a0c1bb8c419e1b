/// Mock image classifier for testing and demonstration purposes
use super::{image_fingerprint, ClassPrediction, ImageClassifier};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::complaints::{ModelInfo, IMAGE_SIZE};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockClassifierConfig {
    /// Class labels, in class-index order
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,

    /// Simulate inference delay in milliseconds
    #[serde(default)]
    pub simulated_delay_ms: u64,
}

fn default_labels() -> Vec<String> {
    vec![
        "Garbage".to_string(),
        "Damaged Road".to_string(),
        "Other".to_string(),
    ]
}

impl Default for MockClassifierConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
            simulated_delay_ms: 0,
        }
    }
}

/// Deterministic classifier.
///
/// Images registered with [`MockClassifier::with_response`] get exactly the
/// scores given; [`MockClassifier::failing_on`] makes inference fail for an
/// image and [`MockClassifier::set_failing`] for every image. Everything else gets a pseudo-random but stable answer derived from
/// the image content.
pub struct MockClassifier {
    config: MockClassifierConfig,
    responses: HashMap<u64, Vec<f32>>,
    failures: HashSet<u64>,
    fail_all: AtomicBool,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::with_config(MockClassifierConfig::default())
    }

    pub fn with_config(config: MockClassifierConfig) -> Self {
        Self {
            config,
            responses: HashMap::new(),
            failures: HashSet::new(),
            fail_all: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer `probabilities` (one per label) whenever `image` is classified
    pub fn with_response(mut self, image: &DynamicImage, probabilities: Vec<f32>) -> Self {
        self.responses
            .insert(image_fingerprint(image), probabilities);
        self
    }

    /// Fail inference whenever `image` is classified
    pub fn failing_on(mut self, image: &DynamicImage) -> Self {
        self.failures.insert(image_fingerprint(image));
        self
    }

    /// Fail every inference from now on, or stop failing
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Number of `predict` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn derived_scores(&self, fingerprint: u64) -> Vec<f32> {
        let count = self.config.labels.len();
        let winner = (fingerprint % count as u64) as usize;
        let confidence = 0.5 + (fingerprint % 50) as f32 / 100.0;
        let rest = if count > 1 {
            (1.0 - confidence) / (count - 1) as f32
        } else {
            0.0
        };
        (0..count)
            .map(|i| if i == winner { confidence } else { rest })
            .collect()
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageClassifier for MockClassifier {
    fn id(&self) -> &'static str {
        "mock"
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock-classifier".to_string(),
            labels: self.config.labels.clone(),
            class_count: self.config.labels.len(),
            input_size: IMAGE_SIZE,
        }
    }

    async fn predict(&self, image: &DynamicImage) -> Result<Vec<ClassPrediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.config.simulated_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.simulated_delay_ms,
            ))
            .await;
        }

        let fingerprint = image_fingerprint(image);
        if self.fail_all.load(Ordering::SeqCst) || self.failures.contains(&fingerprint) {
            return Err(anyhow!("mock inference failure"));
        }

        let scores = self
            .responses
            .get(&fingerprint)
            .cloned()
            .unwrap_or_else(|| self.derived_scores(fingerprint));

        Ok(self
            .config
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
