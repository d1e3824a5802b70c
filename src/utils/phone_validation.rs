//! Phone number validation for outbound call placement
//!
//! This module validates destination numbers before they are handed to the
//! carrier REST API. It ensures numbers:
//! - Are in E.164 format (`+` followed by 2 to 15 digits, no leading zero)
//! - Contain no letters or unexpected symbols after normalization
//!
//! Formatting characters commonly pasted from address books (spaces, dashes,
//! dots, parentheses) are stripped before validation, so `+1 (555) 000-1111`
//! and `+15550001111` are both accepted and normalize to the same value.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during phone number validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneValidationError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number must start with '+' followed by the country code")]
    MissingPlusPrefix,

    #[error("Phone number is not valid E.164: {0}")]
    InvalidFormat(String),
}

/// E.164: a leading `+`, a non-zero first digit, then 1 to 14 further digits
static E164_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[1-9]\d{1,14}$").unwrap_or_else(|e| panic!("Invalid E.164 regex: {e}"))
});

/// Characters tolerated in user-supplied numbers and removed before validation
static FORMATTING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\-\.\(\)]").unwrap_or_else(|e| panic!("Invalid formatting regex: {e}"))
});

/// Validate a destination phone number and normalize it to bare E.164
///
/// # Arguments
/// * `raw` - The phone number as supplied by the API caller
///
/// # Returns
/// * `Result<String, PhoneValidationError>` - The normalized `+<digits>` form,
///   or an error describing why the number was rejected
///
/// # Example
/// ```rust
/// use voicebridge_gateway::utils::phone_validation::validate_phone_number;
///
/// let normalized = validate_phone_number("+1 (555) 000-1111").unwrap();
/// assert_eq!(normalized, "+15550001111");
/// assert!(validate_phone_number("555-0111").is_err());
/// ```
pub fn validate_phone_number(raw: &str) -> Result<String, PhoneValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneValidationError::Empty);
    }

    let normalized = FORMATTING_RE.replace_all(trimmed, "").to_string();

    if !normalized.starts_with('+') {
        warn!(number = %trimmed, "Rejected phone number without + prefix");
        return Err(PhoneValidationError::MissingPlusPrefix);
    }

    if !E164_RE.is_match(&normalized) {
        warn!(number = %trimmed, "Rejected phone number failing E.164 validation");
        return Err(PhoneValidationError::InvalidFormat(normalized));
    }

    Ok(normalized)
}
