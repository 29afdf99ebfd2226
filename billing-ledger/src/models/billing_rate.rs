//! Billing rate model for billing-ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Hourly rate valid over `[effective_from, effective_until)`.
///
/// `user_id = None` makes the rate firm-wide; `service_type = None` makes it
/// the standard rate for its scope.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingRate {
    pub billing_rate_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub service_type: Option<String>,
    pub hourly_rate: Decimal,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl BillingRate {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_until.map_or(true, |until| date < until)
    }
}

/// Input for creating a billing rate.
#[derive(Debug, Clone, Validate)]
pub struct CreateBillingRate {
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub service_type: Option<String>,
    pub hourly_rate: Decimal,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
}
