//! CPF (Cadastro de Pessoas Físicas), 11 digits.

use super::{join, validate_digits, ValidationResult};

const FIRST_WEIGHTS: [u32; 9] = [10, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 10] = [11, 10, 9, 8, 7, 6, 5, 4, 3, 2];

/// Validate a CPF with or without punctuation. Canonical form is
/// `###.###.###-##`.
pub fn validate_cpf(raw: &str) -> ValidationResult {
    validate_digits(raw, &FIRST_WEIGHTS, &SECOND_WEIGHTS, format_cpf)
}

fn format_cpf(digits: &[u32]) -> String {
    format!(
        "{}.{}.{}-{}",
        join(&digits[0..3]),
        join(&digits[3..6]),
        join(&digits[6..9]),
        join(&digits[9..11])
    )
}
