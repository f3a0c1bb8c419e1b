//! Input validation for complaint form fields
//!
//! Every value coming from a client passes through here before it reaches a
//! form session, so oversized text or impossible coordinates are rejected at
//! the boundary instead of deep inside the service.

use anyhow::{anyhow, Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for a complaint title
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum length for a complaint description
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Maximum length for a manually entered address
pub const MAX_ADDRESS_LENGTH: usize = 1024;

/// Maximum decoded size of an uploaded image
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Safe Time Operations
// ============================================================================

/// Current Unix timestamp in milliseconds, 0 if the clock is before the epoch
pub fn safe_unix_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "System clock is before UNIX epoch (1970-01-01), using timestamp 0"
            );
            0
        }
    }
}

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<()> {
    validate_length(title, MAX_TITLE_LENGTH, "title")
}

pub fn validate_description(description: &str) -> Result<()> {
    validate_length(description, MAX_DESCRIPTION_LENGTH, "description")
}

pub fn validate_address(address: &str) -> Result<()> {
    validate_length(address, MAX_ADDRESS_LENGTH, "manual_address")
}

/// Parse UUID with validation
pub fn parse_uuid(uuid_str: &str, field_name: &str) -> Result<Uuid> {
    validate_non_empty(uuid_str, field_name)?;
    Uuid::parse_str(uuid_str).with_context(|| format!("{} is not a valid UUID", field_name))
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Validate a value falls in `[min, max]`
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {} (got {})",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

/// Validate a latitude/longitude pair (rejects NaN as well)
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<()> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(anyhow!("coordinates must be finite numbers"));
    }
    validate_range(lat, -90.0, 90.0, "lat")?;
    validate_range(lng, -180.0, 180.0, "lng")?;
    Ok(())
}
