//! Daily time summary rollup.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{DailyTimeSummary, EntryType, TimeEntry};

/// Recompute the summary for `(tenant_id, user_id, date)` from scratch.
///
/// `entries` may contain anything; only counted entries of that tenant, user
/// and date contribute. Returns `None` when no entry is left, in which case
/// the stored row must be removed.
pub fn summarize<'a>(
    tenant_id: Uuid,
    user_id: Uuid,
    date: NaiveDate,
    entries: impl IntoIterator<Item = &'a TimeEntry>,
    now: DateTime<Utc>,
) -> Option<DailyTimeSummary> {
    let mut summary = DailyTimeSummary {
        tenant_id,
        user_id,
        summary_date: date,
        total_minutes: 0,
        billable_minutes: 0,
        non_billable_minutes: 0,
        case_work_minutes: 0,
        subscription_work_minutes: 0,
        administrative_minutes: 0,
        other_minutes: 0,
        total_billable_amount: Decimal::ZERO,
        total_entries: 0,
        updated_utc: now,
    };

    for entry in entries.into_iter().filter(|e| {
        e.tenant_id == tenant_id
            && e.user_id == user_id
            && e.entry_date == date
            && e.entry_status.counts()
    }) {
        let minutes = entry.effective_minutes;
        summary.total_minutes += minutes;
        if entry.is_billable {
            summary.billable_minutes += minutes;
        }
        match entry.entry_type {
            EntryType::CaseWork => summary.case_work_minutes += minutes,
            EntryType::SubscriptionWork => summary.subscription_work_minutes += minutes,
            EntryType::Administrative => summary.administrative_minutes += minutes,
            EntryType::Other => summary.other_minutes += minutes,
        }
        summary.total_billable_amount += entry.billable_amount;
        summary.total_entries += 1;
    }

    if summary.total_entries == 0 {
        return None;
    }

    summary.non_billable_minutes = summary.total_minutes - summary.billable_minutes;
    Some(summary)
}

/// Dates whose rollup a change from `before` to `after` touches.
pub fn affected_dates(before: Option<&TimeEntry>, after: Option<&TimeEntry>) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = before
        .into_iter()
        .chain(after)
        .map(|e| e.entry_date)
        .collect();
    dates.sort();
    dates.dedup();
    dates
}
