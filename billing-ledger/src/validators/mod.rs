//! Brazilian tax identifier validators (CPF for individuals, CNPJ for
//! companies).
//!
//! Validation never fails with an error: the outcome is a
//! [`ValidationResult`] the caller can turn into a user-facing message.
//! Use [`require_valid`] at admission points where an invalid identifier
//! must stop the write.

pub mod cnpj;
pub mod cpf;

use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

pub use cnpj::validate_cnpj;
pub use cpf::validate_cpf;

/// Why an identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    #[error("no digits supplied")]
    Empty,
    #[error("expected {expected} digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("all digits are identical")]
    RepeatedDigits,
    #[error("check digits do not match")]
    CheckDigitMismatch,
}

/// Outcome of validating a raw identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Formatted identifier, present only when valid.
    pub canonical: Option<String>,
    pub reason: Option<InvalidReason>,
}

impl ValidationResult {
    fn ok(canonical: String) -> Self {
        Self {
            valid: true,
            canonical: Some(canonical),
            reason: None,
        }
    }

    fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            canonical: None,
            reason: Some(reason),
        }
    }
}

/// Turn a failed validation into a `ValidationError` naming the field.
pub fn require_valid(field: &str, result: ValidationResult) -> Result<String, AppError> {
    match (result.canonical, result.reason) {
        (Some(canonical), _) if result.valid => Ok(canonical),
        (_, Some(reason)) => Err(AppError::validation(format!("Invalid {}: {}", field, reason))),
        _ => Err(AppError::validation(format!("Invalid {}", field))),
    }
}

/// Shared two-pass weighted checksum used by both identifiers.
///
/// `first_weights` covers the base digits; `second_weights` covers the base
/// digits plus the first check digit.
fn validate_digits(
    raw: &str,
    first_weights: &[u32],
    second_weights: &[u32],
    format: fn(&[u32]) -> String,
) -> ValidationResult {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    let expected = second_weights.len() + 1;

    if digits.is_empty() {
        return ValidationResult::invalid(InvalidReason::Empty);
    }
    if digits.len() != expected {
        return ValidationResult::invalid(InvalidReason::InvalidLength {
            expected,
            actual: digits.len(),
        });
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return ValidationResult::invalid(InvalidReason::RepeatedDigits);
    }

    let base = first_weights.len();
    let first = check_digit(&digits[..base], first_weights);
    let second = check_digit(&digits[..base + 1], second_weights);

    if first != digits[base] || second != digits[base + 1] {
        return ValidationResult::invalid(InvalidReason::CheckDigitMismatch);
    }

    ValidationResult::ok(format(&digits))
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match 11 - (sum % 11) {
        10 | 11 => 0,
        d => d,
    }
}

fn join(digits: &[u32]) -> String {
    digits
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect()
}
