//! Invoice number formatting.
//!
//! The counter behind the sequence lives in the store; it is keyed by
//! `(tenant, prefix)` and is never reset, so the year in a number is
//! informational only.

use crate::models::InvoiceType;

pub fn prefix_for(invoice_type: InvoiceType) -> &'static str {
    match invoice_type {
        InvoiceType::Subscription => "SUB",
        InvoiceType::CaseBilling => "CASE",
        InvoiceType::PaymentPlan => "PLAN",
        InvoiceType::TimeBased => "TIME",
        InvoiceType::Hybrid => "HYB",
        InvoiceType::Adjustment => "ADJ",
        InvoiceType::LateFee => "LATE",
        InvoiceType::Standard => "INV",
    }
}

/// `{PREFIX}-{year}-{sequence:06}`. Sequences past 999999 keep all digits.
pub fn format_invoice_number(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{}-{}-{:06}", prefix, year, sequence)
}

/// Numeric suffix of a generated number, if it has the generated shape.
pub fn parse_sequence(invoice_number: &str) -> Option<i64> {
    let mut parts = invoice_number.rsplitn(3, '-');
    let sequence = parts.next()?;
    let year = parts.next()?;
    let prefix = parts.next()?;
    if prefix.is_empty() || year.len() != 4 || year.parse::<i32>().is_err() {
        return None;
    }
    sequence.parse().ok()
}

/// Prefix and sequence a caller-chosen number occupies in the generated
/// series, if it belongs to one.
pub fn claimed_sequence(invoice_number: &str) -> Option<(&'static str, i64)> {
    let sequence = parse_sequence(invoice_number)?;
    let prefix = invoice_number.rsplitn(3, '-').nth(2)?;
    let prefix = PREFIXES.iter().copied().find(|p| *p == prefix)?;
    (sequence > 0).then_some((prefix, sequence))
}

const PREFIXES: [&str; 8] = ["SUB", "CASE", "PLAN", "TIME", "HYB", "ADJ", "LATE", "INV"];
