//! Line item model for billing-ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
    pub time_entry_id: Option<Uuid>,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for inserting (no `line_item_id`) or replacing a line item.
#[derive(Debug, Clone, Validate)]
pub struct UpsertLineItem {
    pub line_item_id: Option<Uuid>,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Checked against `quantity * unit_price` when supplied.
    pub line_total: Option<Decimal>,
    /// Explicit tax; wins over `tax_rate`.
    pub tax_amount: Option<Decimal>,
    /// Fraction of the line total, e.g. `0.10`.
    pub tax_rate: Option<Decimal>,
    pub time_entry_id: Option<Uuid>,
    pub sort_order: i32,
}

impl UpsertLineItem {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            line_item_id: None,
            description: description.into(),
            quantity,
            unit_price,
            line_total: None,
            tax_amount: None,
            tax_rate: None,
            time_entry_id: None,
            sort_order: 0,
        }
    }

    pub fn with_tax(mut self, tax_amount: Decimal) -> Self {
        self.tax_amount = Some(tax_amount);
        self
    }

    pub fn replacing(mut self, line_item_id: Uuid) -> Self {
        self.line_item_id = Some(line_item_id);
        self
    }
}
