//! Complaint draft held by one form session.
//!
//! Validity is tied to the exact image set it was computed for: every
//! mutation of the image list bumps `generation` and clears the verdict in
//! the same step, and a verdict is only applied when it was produced for the
//! current generation.

use common::complaints::{
    GeoLocation, ImageSummary, PredictionResult, SubmissionReceipt, ValidationReport,
    SUBMISSION_REDIRECT,
};
use common::validation::{safe_unix_millis, validate_address, validate_description, validate_title};
use uuid::Uuid;

use crate::capture::CapturedImage;
use crate::error::{ComplaintError, ComplaintResult};

#[derive(Debug, Clone, Default)]
pub struct ComplaintDraft {
    title: String,
    description: String,
    manual_address: String,
    detected_address: Option<String>,
    location: Option<GeoLocation>,
    images: Vec<CapturedImage>,
    valid: bool,
    result: Option<PredictionResult>,
    generation: u64,
}

impl ComplaintDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn manual_address(&self) -> &str {
        &self.manual_address
    }

    pub fn detected_address(&self) -> Option<&str> {
        self.detected_address.as_deref()
    }

    pub fn location(&self) -> Option<GeoLocation> {
        self.location
    }

    pub fn images(&self) -> &[CapturedImage] {
        &self.images
    }

    pub fn image(&self, index: usize) -> ComplaintResult<&CapturedImage> {
        self.images
            .get(index)
            .ok_or(ComplaintError::ImageNotFound(index))
    }

    pub fn image_summaries(&self) -> Vec<ImageSummary> {
        self.images
            .iter()
            .enumerate()
            .map(|(index, image)| image.summary(index))
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        self.result.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply a partial field update. Nothing changes unless every supplied
    /// field passes its bounds check.
    pub fn update_fields(
        &mut self,
        title: Option<String>,
        description: Option<String>,
        manual_address: Option<String>,
    ) -> ComplaintResult<()> {
        if let Some(title) = &title {
            validate_title(title).map_err(ComplaintError::invalid_input)?;
        }
        if let Some(description) = &description {
            validate_description(description).map_err(ComplaintError::invalid_input)?;
        }
        if let Some(address) = &manual_address {
            validate_address(address).map_err(ComplaintError::invalid_input)?;
        }

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(address) = manual_address {
            self.manual_address = address;
        }
        Ok(())
    }

    /// Append an image; returns its index
    pub fn add_image(&mut self, image: CapturedImage) -> usize {
        self.images.push(image);
        self.invalidate();
        self.images.len() - 1
    }

    pub fn remove_image(&mut self, index: usize) -> ComplaintResult<CapturedImage> {
        if index >= self.images.len() {
            return Err(ComplaintError::ImageNotFound(index));
        }
        let removed = self.images.remove(index);
        self.invalidate();
        Ok(removed)
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.valid = false;
        self.result = None;
    }

    /// Record a verdict computed for image-set `generation`.
    ///
    /// Returns `false` and leaves the draft untouched when the image set
    /// changed since the run started.
    pub fn apply_verdict(&mut self, generation: u64, report: &ValidationReport) -> bool {
        if generation != self.generation {
            return false;
        }
        self.valid = report.verdict.is_allowed();
        self.result = Some(report.result.clone());
        true
    }

    pub fn set_location(&mut self, location: GeoLocation) {
        self.location = Some(location);
    }

    pub fn set_detected_address(&mut self, address: String) {
        self.detected_address = Some(address);
    }

    /// Manual entry wins over the geocoded address when it is not blank
    pub fn effective_address(&self) -> Option<&str> {
        if !self.manual_address.trim().is_empty() {
            Some(self.manual_address.as_str())
        } else {
            self.detected_address.as_deref()
        }
    }

    /// Produce the submission receipt; only a validated draft can be submitted
    pub fn submit(&self) -> ComplaintResult<SubmissionReceipt> {
        if !self.valid {
            return Err(ComplaintError::NotValidated);
        }
        Ok(SubmissionReceipt {
            complaint_id: Uuid::new_v4(),
            title: self.title.clone(),
            description: self.description.clone(),
            address: self.effective_address().unwrap_or_default().to_string(),
            image_count: self.images.len(),
            submitted_at: safe_unix_millis(),
            redirect: SUBMISSION_REDIRECT.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageSource;
    use common::complaints::{Verdict, IMAGE_SIZE};
    use common::validation::MAX_TITLE_LENGTH;
    use image::{DynamicImage, Rgb, RgbImage};

    fn image(shade: u8) -> CapturedImage {
        let raster = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb([shade, shade, shade]));
        CapturedImage::from_source(ImageSource::Camera(DynamicImage::ImageRgb8(raster))).unwrap()
    }

    fn report(verdict: Verdict) -> ValidationReport {
        ValidationReport {
            verdict,
            combined_score: if verdict.is_allowed() { 80.0 } else { 20.0 },
            images: vec![],
            result: PredictionResult::from(verdict),
        }
    }

    fn validated_draft() -> ComplaintDraft {
        let mut draft = ComplaintDraft::new();
        draft.add_image(image(1));
        draft.add_image(image(2));
        assert!(draft.apply_verdict(draft.generation(), &report(Verdict::Allowed)));
        draft
    }

    #[test]
    fn test_submit_requires_validation() {
        let mut draft = ComplaintDraft::new();
        draft.add_image(image(1));
        draft.add_image(image(2));
        assert!(matches!(draft.submit(), Err(ComplaintError::NotValidated)));
    }

    #[test]
    fn test_invalid_verdict_blocks_submit() {
        let mut draft = ComplaintDraft::new();
        draft.add_image(image(1));
        draft.add_image(image(2));
        draft.apply_verdict(draft.generation(), &report(Verdict::Invalid));

        assert!(!draft.is_valid());
        assert_eq!(draft.result().unwrap().text, "Invalid Image");
        assert!(matches!(draft.submit(), Err(ComplaintError::NotValidated)));
    }

    #[test]
    fn test_adding_image_invalidates() {
        let mut draft = validated_draft();
        assert!(draft.is_valid());

        draft.add_image(image(3));
        assert!(!draft.is_valid());
        assert!(draft.result().is_none());
        assert!(matches!(draft.submit(), Err(ComplaintError::NotValidated)));
    }

    #[test]
    fn test_removing_image_invalidates() {
        let mut draft = validated_draft();
        draft.remove_image(0).unwrap();
        assert!(!draft.is_valid());
        assert_eq!(draft.images().len(), 1);
    }

    #[test]
    fn test_remove_out_of_range_keeps_validity() {
        let mut draft = validated_draft();
        assert!(matches!(
            draft.remove_image(5),
            Err(ComplaintError::ImageNotFound(5))
        ));
        assert!(draft.is_valid());
    }

    #[test]
    fn test_stale_verdict_is_discarded() {
        let mut draft = ComplaintDraft::new();
        draft.add_image(image(1));
        draft.add_image(image(2));
        let started_at = draft.generation();

        draft.add_image(image(3));
        assert!(!draft.apply_verdict(started_at, &report(Verdict::Allowed)));
        assert!(!draft.is_valid());
        assert!(draft.result().is_none());
    }

    #[test]
    fn test_field_update_is_all_or_nothing() {
        let mut draft = ComplaintDraft::new();
        draft
            .update_fields(Some("Pothole".into()), Some("Deep one".into()), None)
            .unwrap();

        let result = draft.update_fields(
            Some("x".repeat(MAX_TITLE_LENGTH + 1)),
            Some("changed".into()),
            None,
        );
        assert!(matches!(result, Err(ComplaintError::InvalidInput(_))));
        assert_eq!(draft.title(), "Pothole");
        assert_eq!(draft.description(), "Deep one");
    }

    #[test]
    fn test_field_updates_do_not_touch_validity() {
        let mut draft = validated_draft();
        draft
            .update_fields(Some("Overflowing bin".into()), None, None)
            .unwrap();
        assert!(draft.is_valid());
    }

    #[test]
    fn test_manual_address_overrides_detected() {
        let mut draft = validated_draft();
        draft.set_detected_address("12 Detected Street".into());
        assert_eq!(draft.effective_address(), Some("12 Detected Street"));

        draft
            .update_fields(None, None, Some("   ".into()))
            .unwrap();
        assert_eq!(draft.effective_address(), Some("12 Detected Street"));

        draft
            .update_fields(None, None, Some("7 Typed Lane".into()))
            .unwrap();
        assert_eq!(draft.submit().unwrap().address, "7 Typed Lane");
    }

    #[test]
    fn test_receipt_contents() {
        let mut draft = validated_draft();
        draft
            .update_fields(Some("Broken road".into()), Some("Near the school".into()), None)
            .unwrap();

        let receipt = draft.submit().unwrap();
        assert_eq!(receipt.title, "Broken road");
        assert_eq!(receipt.image_count, 2);
        assert_eq!(receipt.address, "");
        assert_eq!(receipt.redirect, "/order");
    }
}
