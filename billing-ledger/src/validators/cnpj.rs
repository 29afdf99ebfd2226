//! CNPJ (Cadastro Nacional da Pessoa Jurídica), 14 digits.

use super::{join, validate_digits, ValidationResult};

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Validate a CNPJ with or without punctuation. Canonical form is
/// `##.###.###/####-##`.
pub fn validate_cnpj(raw: &str) -> ValidationResult {
    validate_digits(raw, &FIRST_WEIGHTS, &SECOND_WEIGHTS, format_cnpj)
}

fn format_cnpj(digits: &[u32]) -> String {
    format!(
        "{}.{}.{}/{}-{}",
        join(&digits[0..2]),
        join(&digits[2..5]),
        join(&digits[5..8]),
        join(&digits[8..12]),
        join(&digits[12..14])
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::InvalidReason;

    const VALID: [&str; 4] = [
        "11222333000181",
        "11444777000161",
        "19131243000197",
        "45997418000153",
    ];

    #[test]
    fn test_valid_with_and_without_punctuation() {
        let plain = validate_cnpj("11222333000181");
        let formatted = validate_cnpj("11.222.333/0001-81");
        let spaced = validate_cnpj("11 222 333 0001 81");

        assert!(plain.valid);
        assert_eq!(plain.canonical.as_deref(), Some("11.222.333/0001-81"));
        assert_eq!(plain, formatted);
        assert_eq!(plain, spaced);
    }

    #[test]
    fn test_known_valid_numbers() {
        for cnpj in VALID {
            assert!(validate_cnpj(cnpj).valid, "{} should be valid", cnpj);
        }
    }

    #[test]
    fn test_single_digit_change_is_rejected() {
        for cnpj in VALID {
            for pos in 0..cnpj.len() {
                for replacement in '0'..='9' {
                    let mut chars: Vec<char> = cnpj.chars().collect();
                    if chars[pos] == replacement {
                        continue;
                    }
                    chars[pos] = replacement;
                    let corrupted: String = chars.into_iter().collect();
                    assert!(
                        !validate_cnpj(&corrupted).valid,
                        "{} (from {}) must not validate",
                        corrupted,
                        cnpj
                    );
                }
            }
        }
    }

    #[test]
    fn test_adjacent_transposition_is_rejected() {
        for cnpj in VALID {
            let chars: Vec<char> = cnpj.chars().collect();
            for pos in 0..chars.len() - 1 {
                if chars[pos] == chars[pos + 1] {
                    continue;
                }
                let mut swapped = chars.clone();
                swapped.swap(pos, pos + 1);
                let swapped: String = swapped.into_iter().collect();
                assert!(!validate_cnpj(&swapped).valid, "{} must not validate", swapped);
            }
        }
    }

    #[test]
    fn test_rejections_carry_reason() {
        assert_eq!(
            validate_cnpj("00.000.000/0000-00").reason,
            Some(InvalidReason::RepeatedDigits)
        );
        assert_eq!(
            validate_cnpj("529.982.247-25").reason,
            Some(InvalidReason::InvalidLength {
                expected: 14,
                actual: 11
            })
        );
        assert_eq!(
            validate_cnpj("11.222.333/0001-18").reason,
            Some(InvalidReason::CheckDigitMismatch)
        );
    }

    #[test]
    fn test_cpf_is_not_a_cnpj() {
        assert!(!validate_cnpj("52998224725").valid);
    }
}
