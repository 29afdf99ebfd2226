//! Derived figures, overlap detection and status rules for time entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use super::rates::{resolve_rate, ResolvedRate};
use super::round_money;
use crate::models::{
    BillingRate, CreateTimeEntry, EntryStatus, TimeEntry, UpdateTimeEntry,
};
use crate::tenancy::TenantContext;

/// Returns `(duration_minutes, effective_minutes)`.
pub fn derive_minutes(
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    break_minutes: i32,
) -> Result<(i32, i32), AppError> {
    if end_time <= start_time {
        return Err(AppError::validation(format!(
            "end_time {} must be after start_time {}",
            end_time, start_time
        )));
    }

    let duration = i32::try_from((end_time - start_time).num_minutes())
        .map_err(|_| AppError::validation("Time entry duration is out of range"))?;

    if break_minutes < 0 {
        return Err(AppError::validation("break_minutes must not be negative"));
    }
    if break_minutes > duration {
        return Err(AppError::validation(format!(
            "break_minutes {} exceeds duration {}",
            break_minutes, duration
        )));
    }

    Ok((duration, duration - break_minutes))
}

/// `effective_minutes * rate / 60`, rounded once at the end.
pub fn billable_amount(effective_minutes: i32, is_billable: bool, rate: Decimal) -> Decimal {
    if !is_billable {
        return Decimal::ZERO;
    }
    round_money(Decimal::from(effective_minutes) * rate / Decimal::from(60))
}

/// An explicit rate on the entry wins; otherwise the resolver decides.
pub fn choose_rate(
    entry: &TimeEntry,
    rates: &[BillingRate],
    firm_default: Option<Decimal>,
) -> ResolvedRate {
    match entry.billable_rate {
        Some(rate) => ResolvedRate::explicit(rate),
        None => resolve_rate(
            rates,
            entry.user_id,
            entry.service_type.as_deref(),
            entry.entry_date,
            firm_default,
        ),
    }
}

/// Set `applied_rate` and `billable_amount` from the chosen rate.
pub fn price(entry: &mut TimeEntry, rate: ResolvedRate) {
    entry.applied_rate = rate.rate;
    entry.billable_amount = billable_amount(entry.effective_minutes, entry.is_billable, rate.rate);
}

/// Build an unpriced entry from input. Call [`price`] before persisting.
pub fn new_entry(
    ctx: &TenantContext,
    input: &CreateTimeEntry,
    now: DateTime<Utc>,
) -> Result<TimeEntry, AppError> {
    let (duration_minutes, effective_minutes) =
        derive_minutes(input.start_time, input.end_time, input.break_minutes)?;

    Ok(TimeEntry {
        time_entry_id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        user_id: input.user_id,
        matter_id: input.matter_id,
        subscription_id: input.subscription_id,
        entry_type: input.entry_type,
        service_type: input.service_type.clone(),
        description: input.description.clone(),
        entry_date: input.start_time.date_naive(),
        start_time: input.start_time,
        end_time: input.end_time,
        duration_minutes,
        break_minutes: input.break_minutes,
        effective_minutes,
        is_billable: input.is_billable,
        billable_rate: input.billable_rate,
        applied_rate: Decimal::ZERO,
        billable_amount: Decimal::ZERO,
        entry_status: input.entry_status,
        created_utc: now,
        updated_utc: now,
    })
}

/// Apply a patch to an editable entry and re-derive its minutes. The result
/// is unpriced.
pub fn apply_update(
    current: &TimeEntry,
    patch: &UpdateTimeEntry,
    now: DateTime<Utc>,
) -> Result<TimeEntry, AppError> {
    ensure_editable(current)?;

    let mut next = current.clone();
    if let Some(matter_id) = patch.matter_id {
        next.matter_id = Some(matter_id);
    }
    if let Some(subscription_id) = patch.subscription_id {
        next.subscription_id = Some(subscription_id);
    }
    if let Some(entry_type) = patch.entry_type {
        next.entry_type = entry_type;
    }
    if let Some(service_type) = &patch.service_type {
        next.service_type = Some(service_type.clone());
    }
    if let Some(description) = &patch.description {
        next.description = description.clone();
    }
    if let Some(start_time) = patch.start_time {
        next.start_time = start_time;
    }
    if let Some(end_time) = patch.end_time {
        next.end_time = end_time;
    }
    if let Some(break_minutes) = patch.break_minutes {
        next.break_minutes = break_minutes;
    }
    if let Some(is_billable) = patch.is_billable {
        next.is_billable = is_billable;
    }
    if let Some(billable_rate) = patch.billable_rate {
        next.billable_rate = billable_rate;
    }

    let (duration_minutes, effective_minutes) =
        derive_minutes(next.start_time, next.end_time, next.break_minutes)?;
    next.duration_minutes = duration_minutes;
    next.effective_minutes = effective_minutes;
    next.entry_date = next.start_time.date_naive();
    next.updated_utc = now;

    Ok(next)
}

pub fn ensure_editable(entry: &TimeEntry) -> Result<(), AppError> {
    if entry.entry_status.is_editable() {
        return Ok(());
    }
    Err(AppError::immutable(format!(
        "Time entry {} is {} and cannot be edited",
        entry.time_entry_id,
        entry.entry_status.as_str()
    )))
}

pub fn ensure_deletable(entry: &TimeEntry) -> Result<(), AppError> {
    if entry.entry_status.is_locked() {
        return Err(AppError::immutable(format!(
            "Time entry {} is {} and cannot be deleted",
            entry.time_entry_id,
            entry.entry_status.as_str()
        )));
    }
    Ok(())
}

/// First counted entry of the same user whose `[start, end)` intersects the
/// candidate. A rejected candidate never conflicts.
pub fn find_overlap<'a>(
    existing: impl IntoIterator<Item = &'a TimeEntry>,
    candidate: &TimeEntry,
) -> Option<&'a TimeEntry> {
    if !candidate.entry_status.counts() {
        return None;
    }
    existing.into_iter().find(|other| {
        other.time_entry_id != candidate.time_entry_id
            && other.tenant_id == candidate.tenant_id
            && other.user_id == candidate.user_id
            && other.entry_status.counts()
            && other.start_time < candidate.end_time
            && candidate.start_time < other.end_time
    })
}

pub fn check_overlap<'a>(
    existing: impl IntoIterator<Item = &'a TimeEntry>,
    candidate: &TimeEntry,
) -> Result<(), AppError> {
    match find_overlap(existing, candidate) {
        Some(other) => Err(AppError::Overlap(anyhow::anyhow!(
            "[{}, {}) overlaps time entry {} [{}, {})",
            candidate.start_time,
            candidate.end_time,
            other.time_entry_id,
            other.start_time,
            other.end_time
        ))),
        None => Ok(()),
    }
}

/// Validate an approval-workflow move.
pub fn check_transition(from: EntryStatus, to: EntryStatus) -> Result<(), AppError> {
    use EntryStatus::*;

    match (from, to) {
        (Billed, _) | (Approved, Draft | Pending | Approved | Rejected) => {
            Err(AppError::immutable(format!(
                "Time entry is {} and cannot move to {}",
                from.as_str(),
                to.as_str()
            )))
        }
        (Draft, Pending)
        | (Pending, Approved | Rejected | Draft)
        | (Rejected, Draft)
        | (Approved, Billed) => Ok(()),
        _ => Err(AppError::validation(format!(
            "Cannot move time entry from {} to {}",
            from.as_str(),
            to.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use service_core::error::ErrorKind;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    fn ctx() -> TenantContext {
        TenantContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn entry(ctx: &TenantContext, start: DateTime<Utc>, end: DateTime<Utc>) -> TimeEntry {
        let input = CreateTimeEntry::new(ctx.user_id, EntryType::CaseWork, start, end);
        new_entry(ctx, &input, Utc::now()).unwrap()
    }

    #[test]
    fn test_amount_for_120_minutes_with_20_minute_break() {
        let (duration, effective) = derive_minutes(at(9, 0), at(11, 0), 20).unwrap();
        assert_eq!(duration, 120);
        assert_eq!(effective, 100);
        assert_eq!(billable_amount(effective, true, dec!(200)), dec!(333.33));
    }

    #[test]
    fn test_amount_for_90_minutes_with_15_minute_break() {
        let (_, effective) = derive_minutes(at(14, 0), at(15, 30), 15).unwrap();
        assert_eq!(effective, 75);
        assert_eq!(billable_amount(effective, true, dec!(300)), dec!(375.00));
    }

    #[test]
    fn test_non_billable_is_zero() {
        assert_eq!(billable_amount(600, false, dec!(1000)), Decimal::ZERO);
    }

    #[test]
    fn test_invalid_ranges() {
        let err = derive_minutes(at(10, 0), at(10, 0), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = derive_minutes(at(10, 0), at(9, 0), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = derive_minutes(at(10, 0), at(10, 30), 31).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = derive_minutes(at(10, 0), at(10, 30), -1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(derive_minutes(at(10, 0), at(10, 30), 30).unwrap(), (30, 0));
    }

    #[test]
    fn test_explicit_rate_wins() {
        let ctx = ctx();
        let mut e = entry(&ctx, at(9, 0), at(10, 0));
        e.billable_rate = Some(dec!(250));
        let resolved = choose_rate(&e, &[], Some(dec!(100)));
        assert_eq!(resolved.rate, dec!(250));

        e.billable_rate = None;
        let resolved = choose_rate(&e, &[], Some(dec!(100)));
        assert_eq!(resolved.rate, dec!(100));

        price(&mut e, resolved);
        assert_eq!(e.billable_amount, dec!(100.00));
    }

    #[test]
    fn test_overlap_is_half_open() {
        let ctx = ctx();
        let first = entry(&ctx, at(9, 0), at(10, 0));
        let touching = entry(&ctx, at(10, 0), at(11, 0));
        let inside = entry(&ctx, at(9, 30), at(9, 45));

        assert!(find_overlap([&first], &touching).is_none());
        assert_eq!(
            check_overlap([&first], &inside).unwrap_err().kind(),
            ErrorKind::Overlap
        );
    }

    #[test]
    fn test_overlap_ignores_rejected_self_and_other_users() {
        let ctx = ctx();
        let mut rejected = entry(&ctx, at(9, 0), at(10, 0));
        rejected.entry_status = EntryStatus::Rejected;
        let candidate = entry(&ctx, at(9, 0), at(10, 0));
        assert!(find_overlap([&rejected], &candidate).is_none());

        assert!(find_overlap([&candidate], &candidate).is_none());

        let colleague = TenantContext::new(ctx.tenant_id, Uuid::new_v4());
        let theirs = entry(&colleague, at(9, 0), at(10, 0));
        assert!(find_overlap([&theirs], &candidate).is_none());
    }

    #[test]
    fn test_apply_update_rederives_minutes_and_date() {
        let ctx = ctx();
        let e = entry(&ctx, at(9, 0), at(10, 0));
        let patch = UpdateTimeEntry {
            start_time: Some(at(9, 0) + Duration::days(1)),
            end_time: Some(at(11, 0) + Duration::days(1)),
            break_minutes: Some(10),
            ..Default::default()
        };
        let next = apply_update(&e, &patch, Utc::now()).unwrap();
        assert_eq!(next.duration_minutes, 120);
        assert_eq!(next.effective_minutes, 110);
        assert_eq!(next.entry_date, e.entry_date + Duration::days(1));
    }

    #[test]
    fn test_locked_entries_reject_edits_and_deletes() {
        let ctx = ctx();
        let mut e = entry(&ctx, at(9, 0), at(10, 0));
        e.entry_status = EntryStatus::Approved;

        let err = apply_update(&e, &UpdateTimeEntry::default(), Utc::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableState);
        assert_eq!(ensure_deletable(&e).unwrap_err().kind(), ErrorKind::ImmutableState);

        e.entry_status = EntryStatus::Rejected;
        assert!(ensure_deletable(&e).is_ok());
        assert_eq!(ensure_editable(&e).unwrap_err().kind(), ErrorKind::ImmutableState);
    }

    #[test]
    fn test_status_transitions() {
        use EntryStatus::*;

        for (from, to) in [
            (Draft, Pending),
            (Pending, Approved),
            (Pending, Rejected),
            (Pending, Draft),
            (Rejected, Draft),
            (Approved, Billed),
        ] {
            assert!(check_transition(from, to).is_ok(), "{:?} -> {:?}", from, to);
        }

        for (from, to) in [(Approved, Draft), (Approved, Rejected), (Billed, Draft), (Billed, Billed)] {
            assert_eq!(
                check_transition(from, to).unwrap_err().kind(),
                ErrorKind::ImmutableState
            );
        }

        for (from, to) in [(Draft, Approved), (Draft, Billed), (Rejected, Approved), (Draft, Draft)] {
            assert_eq!(
                check_transition(from, to).unwrap_err().kind(),
                ErrorKind::Validation
            );
        }
    }
}
