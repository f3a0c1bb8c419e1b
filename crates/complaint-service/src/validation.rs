//! Image validation pipeline.
//!
//! Each image is classified in turn and its top class looked up in the
//! accepted categories. Accepted images contribute `probability × 100` to a
//! running total, everything else contributes zero, and the total is averaged
//! over all images. The batch is `Allowed` only when that average is strictly
//! above the threshold, so one off-topic photo can sink an otherwise good set.

use common::complaints::{ImageScore, PredictionResult, ValidationReport, Verdict};
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::CapturedImage;
use crate::classifier::{prepare_rgb, ClassPrediction, ImageClassifier};
use crate::error::{ComplaintError, ComplaintResult};

/// Minimum number of images a validation run needs
pub const MIN_IMAGES: usize = 2;

/// Which labels count and how high the combined score must be
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPolicy {
    pub accepted_labels: Vec<String>,
    /// Percentage-scale threshold; the score must be strictly greater
    pub threshold: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            accepted_labels: vec!["Garbage".to_string(), "Damaged Road".to_string()],
            threshold: 50.0,
        }
    }
}

impl ValidationPolicy {
    pub fn accepts(&self, label: &str) -> bool {
        self.accepted_labels.iter().any(|accepted| accepted == label)
    }

    pub fn verdict(&self, combined_score: f64) -> Verdict {
        if combined_score > self.threshold {
            Verdict::Allowed
        } else {
            Verdict::Invalid
        }
    }
}

/// Highest-probability class; the earliest class wins a tie.
///
/// NaN scores never win.
pub fn top_class(predictions: &[ClassPrediction]) -> Option<&ClassPrediction> {
    let mut best: Option<&ClassPrediction> = None;
    for prediction in predictions {
        let replace = match best {
            Some(current) => prediction.probability > current.probability,
            None => !prediction.probability.is_nan(),
        };
        if replace {
            best = Some(prediction);
        }
    }
    best
}

/// Classify every image and decide whether the set is a valid complaint.
///
/// Images are processed strictly one after another. Any decode or inference
/// failure aborts the whole run.
pub async fn validate(
    images: &[CapturedImage],
    classifier: Option<&dyn ImageClassifier>,
    policy: &ValidationPolicy,
) -> ComplaintResult<ValidationReport> {
    if images.len() < MIN_IMAGES {
        return Err(ComplaintError::too_few_images());
    }
    let classifier = classifier.ok_or_else(ComplaintError::classifier_missing)?;
    let input_size = classifier.input_size();

    let mut accumulator = 0.0f64;
    let mut scores = Vec::with_capacity(images.len());

    for (index, image) in images.iter().enumerate() {
        let stored = image.clone();
        let input = tokio::task::spawn_blocking(move || {
            stored
                .decode()
                .map(|decoded| DynamicImage::ImageRgb8(prepare_rgb(&decoded, input_size)))
        })
        .await
        .map_err(|e| ComplaintError::Internal(format!("image decoding task failed: {}", e)))?
        .map_err(|e| {
            warn!(index, error = %format!("{e:#}"), "image decode failed");
            ComplaintError::Validation(format!("image {}: {e:#}", index))
        })?;

        let started = Instant::now();
        let predictions = classifier.predict(&input).await.map_err(|e| {
            warn!(index, error = %format!("{e:#}"), "inference failed");
            ComplaintError::Validation(format!("image {}: {e:#}", index))
        })?;
        telemetry::metrics::CLASSIFIER_INFERENCE_TIME
            .with_label_values(&[classifier.id()])
            .observe(started.elapsed().as_secs_f64());

        let top = top_class(&predictions).ok_or_else(|| {
            ComplaintError::Validation(format!("image {}: classifier returned no usable scores", index))
        })?;

        let accepted = policy.accepts(&top.label);
        if accepted {
            accumulator += f64::from(top.probability) * 100.0;
        }
        debug!(index, label = %top.label, probability = top.probability, accepted, "image classified");

        scores.push(ImageScore {
            index,
            label: top.label.clone(),
            probability: top.probability,
            accepted,
        });
    }

    let combined_score = accumulator / images.len() as f64;
    let verdict = policy.verdict(combined_score);
    info!(
        images = images.len(),
        combined_score,
        verdict = ?verdict,
        "validation finished"
    );

    Ok(ValidationReport {
        verdict,
        combined_score,
        images: scores,
        result: PredictionResult::from(verdict),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageSource;
    use crate::classifier::MockClassifier;
    use common::complaints::IMAGE_SIZE;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn raster(shade: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb([shade, shade / 2, 7])))
    }

    fn captured(shade: u8) -> CapturedImage {
        CapturedImage::from_source(ImageSource::Camera(raster(shade))).unwrap()
    }

    /// Labels: Garbage, Damaged Road, Other
    fn classifier_for(responses: &[(u8, [f32; 3])]) -> MockClassifier {
        responses
            .iter()
            .fold(MockClassifier::new(), |classifier, (shade, scores)| {
                classifier.with_response(&raster(*shade), scores.to_vec())
            })
    }

    fn prediction(label: &str, probability: f32) -> ClassPrediction {
        ClassPrediction {
            label: label.to_string(),
            probability,
        }
    }

    #[test]
    fn test_top_class_first_wins_ties() {
        let predictions = vec![
            prediction("Other", 0.4),
            prediction("Garbage", 0.4),
            prediction("Damaged Road", 0.2),
        ];
        assert_eq!(top_class(&predictions).unwrap().label, "Other");
        assert!(top_class(&[]).is_none());
    }

    #[test]
    fn test_top_class_ignores_nan_scores() {
        let trailing = vec![prediction("Garbage", 0.9), prediction("Other", f32::NAN)];
        assert_eq!(top_class(&trailing).unwrap().label, "Garbage");

        let leading = vec![prediction("Other", f32::NAN), prediction("Damaged Road", 0.3)];
        assert_eq!(top_class(&leading).unwrap().label, "Damaged Road");

        assert!(top_class(&[prediction("Other", f32::NAN)]).is_none());
    }

    #[test]
    fn test_policy_threshold_is_strict() {
        let policy = ValidationPolicy::default();
        assert_eq!(policy.verdict(50.0), Verdict::Invalid);
        assert_eq!(policy.verdict(50.0001), Verdict::Allowed);
        assert!(policy.accepts("Damaged Road"));
        assert!(!policy.accepts("damaged road"));
    }

    #[tokio::test]
    async fn test_fewer_than_two_images_never_calls_classifier() {
        let classifier = MockClassifier::new();
        let policy = ValidationPolicy::default();

        for images in [vec![], vec![captured(10)]] {
            let result = validate(&images, Some(&classifier), &policy).await;
            assert!(matches!(result, Err(ComplaintError::InsufficientInput(_))));
        }
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_classifier_is_insufficient_input() {
        let images = vec![captured(10), captured(20)];
        let result = validate(&images, None, &ValidationPolicy::default()).await;
        assert!(matches!(result, Err(ComplaintError::InsufficientInput(_))));
    }

    #[tokio::test]
    async fn test_all_certain_accepted_scores_hundred() {
        let classifier = classifier_for(&[(10, [1.0, 0.0, 0.0]), (20, [0.0, 1.0, 0.0])]);
        let images = vec![captured(10), captured(20)];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.combined_score, 100.0);
        assert_eq!(report.verdict, Verdict::Allowed);
        assert_eq!(report.result.text, "Allowed Image");
    }

    #[tokio::test]
    async fn test_all_rejected_scores_zero() {
        let classifier = classifier_for(&[(10, [0.1, 0.1, 0.8]), (20, [0.0, 0.3, 0.7])]);
        let images = vec![captured(10), captured(20)];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.combined_score, 0.0);
        assert_eq!(report.verdict, Verdict::Invalid);
        assert!(report.images.iter().all(|score| !score.accepted));
    }

    #[tokio::test]
    async fn test_one_off_topic_image_pulls_average_down() {
        let classifier = classifier_for(&[(10, [0.9, 0.05, 0.05]), (20, [0.1, 0.1, 0.8])]);
        let images = vec![captured(10), captured(20)];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert!((report.combined_score - 45.0).abs() < 1e-4);
        assert_eq!(report.verdict, Verdict::Invalid);
        assert_eq!(report.images[1].label, "Other");
    }

    #[tokio::test]
    async fn test_three_damaged_road_images_allowed() {
        let classifier = classifier_for(&[
            (10, [0.2, 0.6, 0.2]),
            (20, [0.1, 0.7, 0.2]),
            (30, [0.1, 0.8, 0.1]),
        ]);
        let images = vec![captured(10), captured(20), captured(30)];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert!((report.combined_score - 70.0).abs() < 1e-4);
        assert_eq!(report.verdict, Verdict::Allowed);
        assert_eq!(classifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_exactly_fifty_is_invalid() {
        let classifier = classifier_for(&[(10, [1.0, 0.0, 0.0]), (20, [0.0, 0.0, 1.0])]);
        let images = vec![captured(10), captured(20)];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.combined_score, 50.0);
        assert_eq!(report.verdict, Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_higher_accepted_probability_never_lowers_score() {
        let policy = ValidationPolicy::default();
        let images = vec![captured(10), captured(20), captured(30)];
        let mut previous = f64::MIN;

        for probability in [0.4f32, 0.55, 0.7, 0.85, 1.0] {
            let classifier = classifier_for(&[
                (10, [probability, 0.0, 1.0 - probability]),
                (20, [0.0, 0.9, 0.1]),
                (30, [0.2, 0.2, 0.6]),
            ]);
            let report = validate(&images, Some(&classifier), &policy).await.unwrap();
            assert!(report.combined_score >= previous);
            previous = report.combined_score;
        }
    }

    #[tokio::test]
    async fn test_inference_failure_aborts_run() {
        let classifier = classifier_for(&[(10, [1.0, 0.0, 0.0])]).failing_on(&raster(20));
        let images = vec![captured(10), captured(20), captured(30)];

        let result = validate(&images, Some(&classifier), &ValidationPolicy::default()).await;
        assert!(matches!(result, Err(ComplaintError::Validation(_))));
        assert_eq!(classifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_uploaded_and_captured_images_mix() {
        let mut png = Vec::new();
        raster(40)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let upload = CapturedImage::from_source(ImageSource::Upload(png)).unwrap();

        let classifier = classifier_for(&[(10, [0.8, 0.1, 0.1]), (40, [0.1, 0.8, 0.1])]);
        let images = vec![captured(10), upload];

        let report = validate(&images, Some(&classifier), &ValidationPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Allowed);
    }
}
