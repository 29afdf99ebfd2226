//! Invoice totals and invoice lifecycle rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use uuid::Uuid;

use super::round_money;
use crate::models::{Invoice, InvoiceStatus, LineItem, UpsertLineItem};

/// Largest accepted gap between a supplied `line_total` and
/// `quantity * unit_price`.
pub const LINE_TOTAL_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Returns `(line_total, tax_amount)` for an item.
pub fn line_amounts(input: &UpsertLineItem) -> Result<(Decimal, Decimal), AppError> {
    let line_total = round_money(input.quantity * input.unit_price);

    if let Some(supplied) = input.line_total {
        if (supplied - line_total).abs() > LINE_TOTAL_TOLERANCE {
            return Err(AppError::validation(format!(
                "line_total {} does not match quantity {} x unit_price {} = {}",
                supplied, input.quantity, input.unit_price, line_total
            )));
        }
    }

    let tax_amount = match (input.tax_amount, input.tax_rate) {
        (Some(tax), _) => round_money(tax),
        (None, Some(rate)) => round_money(line_total * rate),
        (None, None) => Decimal::ZERO,
    };

    Ok((line_total, tax_amount))
}

/// Build the row to persist for an insert (`existing = None`) or a
/// replacement.
pub fn build_line_item(
    invoice: &Invoice,
    input: &UpsertLineItem,
    existing: Option<&LineItem>,
    now: DateTime<Utc>,
) -> Result<LineItem, AppError> {
    let (line_total, tax_amount) = line_amounts(input)?;

    Ok(LineItem {
        line_item_id: existing.map_or_else(Uuid::new_v4, |item| item.line_item_id),
        invoice_id: invoice.invoice_id,
        tenant_id: invoice.tenant_id,
        description: input.description.clone(),
        quantity: input.quantity,
        unit_price: input.unit_price,
        line_total,
        tax_amount,
        time_entry_id: input.time_entry_id,
        sort_order: input.sort_order,
        created_utc: existing.map_or(now, |item| item.created_utc),
        updated_utc: now,
    })
}

/// `subtotal + tax - discount` over the invoice's current items.
pub fn compute_totals<'a>(
    items: impl IntoIterator<Item = &'a LineItem>,
    discount_amount: Decimal,
) -> Totals {
    let (subtotal, tax_amount) = items
        .into_iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(sub, tax), item| {
            (sub + item.line_total, tax + item.tax_amount)
        });

    Totals {
        subtotal,
        tax_amount,
        total_amount: subtotal + tax_amount - discount_amount,
    }
}

/// Overwrite the derived money columns of `invoice`.
pub fn apply_totals<'a>(
    invoice: &mut Invoice,
    items: impl IntoIterator<Item = &'a LineItem>,
    now: DateTime<Utc>,
) {
    let totals = compute_totals(items, invoice.discount_amount);
    invoice.subtotal = totals.subtotal;
    invoice.tax_amount = totals.tax_amount;
    invoice.total_amount = totals.total_amount;
    invoice.updated_utc = now;
}

pub fn ensure_draft(invoice: &Invoice) -> Result<(), AppError> {
    if invoice.invoice_status == InvoiceStatus::Draft {
        return Ok(());
    }
    Err(AppError::immutable(format!(
        "Invoice {} is {}; only draft invoices can change",
        invoice.invoice_number,
        invoice.invoice_status.as_str()
    )))
}

pub fn validate_discount(discount_amount: Decimal) -> Result<(), AppError> {
    if discount_amount < Decimal::ZERO {
        return Err(AppError::validation(format!(
            "discount_amount {} must not be negative",
            discount_amount
        )));
    }
    Ok(())
}

/// draft -> sent. An invoice with no line items cannot be sent.
pub fn send(invoice: &mut Invoice, line_item_count: usize, now: DateTime<Utc>) -> Result<(), AppError> {
    ensure_draft(invoice)?;
    if line_item_count == 0 {
        return Err(AppError::validation(format!(
            "Invoice {} has no line items",
            invoice.invoice_number
        )));
    }
    invoice.invoice_status = InvoiceStatus::Sent;
    invoice.issue_date = Some(now.date_naive());
    invoice.sent_utc = Some(now);
    invoice.updated_utc = now;
    Ok(())
}

/// draft | sent -> cancelled.
pub fn cancel(invoice: &mut Invoice, now: DateTime<Utc>) -> Result<(), AppError> {
    match invoice.invoice_status {
        InvoiceStatus::Draft | InvoiceStatus::Sent => {
            invoice.invoice_status = InvoiceStatus::Cancelled;
            invoice.cancelled_utc = Some(now);
            invoice.updated_utc = now;
            Ok(())
        }
        other => Err(AppError::immutable(format!(
            "Invoice {} is {} and cannot be cancelled",
            invoice.invoice_number,
            other.as_str()
        ))),
    }
}

pub fn ensure_deletable(invoice: &Invoice) -> Result<(), AppError> {
    match invoice.invoice_status {
        InvoiceStatus::Draft | InvoiceStatus::Cancelled => Ok(()),
        other => Err(AppError::immutable(format!(
            "Invoice {} is {} and cannot be deleted",
            invoice.invoice_number,
            other.as_str()
        ))),
    }
}

/// Add a payment to `amount_paid` and move the status to partial_paid or
/// paid.
pub fn apply_payment(invoice: &mut Invoice, amount: Decimal, now: DateTime<Utc>) -> Result<(), AppError> {
    if !matches!(
        invoice.invoice_status,
        InvoiceStatus::Sent | InvoiceStatus::PartialPaid
    ) {
        return Err(AppError::immutable(format!(
            "Invoice {} is {} and does not accept payments",
            invoice.invoice_number,
            invoice.invoice_status.as_str()
        )));
    }
    if amount <= Decimal::ZERO {
        return Err(AppError::validation("Payment amount must be positive"));
    }

    let paid = invoice.amount_paid + amount;
    if paid > invoice.total_amount {
        return Err(AppError::validation(format!(
            "Payment of {} exceeds amount due {}",
            amount,
            invoice.amount_due()
        )));
    }

    invoice.amount_paid = paid;
    invoice.invoice_status = if paid == invoice.total_amount {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::PartialPaid
    };
    invoice.updated_utc = now;
    Ok(())
}
