//! Validation helpers for inbound commands.

use validator::ValidationError;

/// Validates that a free-text field still has content once surrounding whitespace is trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_not_blank("Main")  // Ok
/// validate_not_blank("  ")    // Err - whitespace only
/// ```
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("value must not be empty".into());
        return Err(err);
    }

    Ok(())
}
