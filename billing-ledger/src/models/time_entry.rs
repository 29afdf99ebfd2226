//! Time entry model for billing-ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Category of work; the daily summary keeps one minute bucket per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    CaseWork,
    SubscriptionWork,
    Administrative,
    Other,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::CaseWork => "case_work",
            EntryType::SubscriptionWork => "subscription_work",
            EntryType::Administrative => "administrative",
            EntryType::Other => "other",
        }
    }
}

impl TryFrom<String> for EntryType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(match value.as_str() {
            "case_work" => EntryType::CaseWork,
            "subscription_work" => EntryType::SubscriptionWork,
            "administrative" => EntryType::Administrative,
            _ => EntryType::Other,
        })
    }
}

/// Approval lifecycle of a time entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Billed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Pending => "pending",
            EntryStatus::Approved => "approved",
            EntryStatus::Rejected => "rejected",
            EntryStatus::Billed => "billed",
        }
    }

    /// Field edits are only accepted before approval.
    pub fn is_editable(&self) -> bool {
        matches!(self, EntryStatus::Draft | EntryStatus::Pending)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, EntryStatus::Approved | EntryStatus::Billed)
    }

    /// Rejected entries are excluded from rollups and overlap checks.
    pub fn counts(&self) -> bool {
        !matches!(self, EntryStatus::Rejected)
    }
}

impl TryFrom<String> for EntryStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(EntryStatus::Draft),
            "pending" => Ok(EntryStatus::Pending),
            "approved" => Ok(EntryStatus::Approved),
            "rejected" => Ok(EntryStatus::Rejected),
            "billed" => Ok(EntryStatus::Billed),
            other => Err(AppError::validation(format!(
                "Unknown time entry status '{}'",
                other
            ))),
        }
    }
}

/// A block of work time with its derived billing figures.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeEntry {
    pub time_entry_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub entry_type: EntryType,
    pub service_type: Option<String>,
    pub description: String,
    pub entry_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub break_minutes: i32,
    pub effective_minutes: i32,
    pub is_billable: bool,
    /// Rate supplied on the entry itself, if any.
    pub billable_rate: Option<Decimal>,
    /// Rate the amount was computed with.
    pub applied_rate: Decimal,
    pub billable_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub entry_status: EntryStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for recording a time entry (manual entry or timer stop).
#[derive(Debug, Clone, Validate)]
pub struct CreateTimeEntry {
    pub user_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub entry_type: EntryType,
    #[validate(length(min = 1, max = 100))]
    pub service_type: Option<String>,
    #[validate(length(max = 2000))]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[validate(range(min = 0))]
    pub break_minutes: i32,
    pub is_billable: bool,
    pub billable_rate: Option<Decimal>,
    /// Initial status; only `Draft` or `Pending` are accepted.
    pub entry_status: EntryStatus,
}

impl CreateTimeEntry {
    pub fn new(
        user_id: Uuid,
        entry_type: EntryType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            matter_id: None,
            subscription_id: None,
            entry_type,
            service_type: None,
            description: String::new(),
            start_time,
            end_time,
            break_minutes: 0,
            is_billable: true,
            billable_rate: None,
            entry_status: EntryStatus::Draft,
        }
    }
}

/// Partial update of an editable time entry.
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdateTimeEntry {
    pub matter_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub entry_type: Option<EntryType>,
    #[validate(length(min = 1, max = 100))]
    pub service_type: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[validate(range(min = 0))]
    pub break_minutes: Option<i32>,
    pub is_billable: Option<bool>,
    /// `Some(None)` clears the explicit rate so the resolver applies again.
    pub billable_rate: Option<Option<Decimal>>,
}
