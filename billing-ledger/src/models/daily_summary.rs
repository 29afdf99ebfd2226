//! Daily time summary model for billing-ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Rollup of one user's counted time entries for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyTimeSummary {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub summary_date: NaiveDate,
    pub total_minutes: i32,
    pub billable_minutes: i32,
    pub non_billable_minutes: i32,
    pub case_work_minutes: i32,
    pub subscription_work_minutes: i32,
    pub administrative_minutes: i32,
    pub other_minutes: i32,
    pub total_billable_amount: Decimal,
    pub total_entries: i32,
    pub updated_utc: DateTime<Utc>,
}
