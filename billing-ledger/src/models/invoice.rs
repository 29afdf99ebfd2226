//! Invoice model for billing-ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Invoice type. Drives the invoice number prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Subscription,
    CaseBilling,
    PaymentPlan,
    TimeBased,
    Hybrid,
    Adjustment,
    LateFee,
    Standard,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Subscription => "subscription",
            InvoiceType::CaseBilling => "case_billing",
            InvoiceType::PaymentPlan => "payment_plan",
            InvoiceType::TimeBased => "time_based",
            InvoiceType::Hybrid => "hybrid",
            InvoiceType::Adjustment => "adjustment",
            InvoiceType::LateFee => "late_fee",
            InvoiceType::Standard => "standard",
        }
    }

    /// Unknown types fall back to `Standard`.
    pub fn from_string(s: &str) -> Self {
        match s {
            "subscription" => InvoiceType::Subscription,
            "case_billing" => InvoiceType::CaseBilling,
            "payment_plan" => InvoiceType::PaymentPlan,
            "time_based" => InvoiceType::TimeBased,
            "hybrid" => InvoiceType::Hybrid,
            "adjustment" => InvoiceType::Adjustment,
            "late_fee" => InvoiceType::LateFee,
            _ => InvoiceType::Standard,
        }
    }
}

impl TryFrom<String> for InvoiceType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::from_string(&value))
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartialPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartialPaid => "partial_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "partial_paid" => Ok(InvoiceStatus::PartialPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(AppError::validation(format!(
                "Unknown invoice status '{}'",
                other
            ))),
        }
    }
}

/// Invoice document. Money columns other than `discount_amount` are derived
/// from line items and payments.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    #[sqlx(try_from = "String")]
    pub invoice_type: InvoiceType,
    #[sqlx(try_from = "String")]
    pub invoice_status: InvoiceStatus,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn amount_due(&self) -> Decimal {
        self.total_amount - self.amount_paid
    }
}

/// Input for creating an invoice. Totals always start at zero.
#[derive(Debug, Clone, Validate)]
pub struct CreateInvoice {
    pub client_id: Uuid,
    pub invoice_type: InvoiceType,
    /// Bypasses the sequencer when set.
    #[validate(length(min = 1, max = 50))]
    pub invoice_number: Option<String>,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub discount_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl CreateInvoice {
    pub fn new(client_id: Uuid, invoice_type: InvoiceType) -> Self {
        Self {
            client_id,
            invoice_type,
            invoice_number: None,
            currency: "BRL".to_string(),
            discount_amount: Decimal::ZERO,
            due_date: None,
            notes: None,
        }
    }
}
