//! Hourly rate resolution for time entries.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::BillingRate;

/// Where the applied rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// `billable_rate` set on the entry itself.
    Explicit,
    /// User rate for the entry's service type.
    UserService,
    /// Firm-wide rate for the entry's service type.
    TenantService,
    /// User standard rate (no service type).
    UserStandard,
    /// Firm-wide standard rate.
    TenantStandard,
    /// Firm `default_hourly_rate`.
    FirmDefault,
    /// Nothing matched.
    Unrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub source: RateSource,
}

impl ResolvedRate {
    pub fn explicit(rate: Decimal) -> Self {
        Self {
            rate,
            source: RateSource::Explicit,
        }
    }
}

/// Rank of a candidate rate for the given entry, or `None` when it does not
/// apply at all. Higher wins.
fn rank(rate: &BillingRate, user_id: Uuid, service_type: Option<&str>) -> Option<(u8, RateSource)> {
    let user_match = match rate.user_id {
        Some(id) if id == user_id => true,
        Some(_) => return None,
        None => false,
    };
    let service_match = match (rate.service_type.as_deref(), service_type) {
        (Some(wanted), Some(actual)) if wanted == actual => true,
        (Some(_), _) => return None,
        (None, _) => false,
    };

    Some(match (user_match, service_match) {
        (true, true) => (4, RateSource::UserService),
        (false, true) => (3, RateSource::TenantService),
        (true, false) => (2, RateSource::UserStandard),
        (false, false) => (1, RateSource::TenantStandard),
    })
}

/// Pick the most specific active rate covering `entry_date`.
///
/// `rates` must already be limited to the caller's tenant. Equal ranks are
/// broken by the latest `effective_from`. Falls back to the firm default,
/// then to zero.
pub fn resolve_rate(
    rates: &[BillingRate],
    user_id: Uuid,
    service_type: Option<&str>,
    entry_date: NaiveDate,
    firm_default: Option<Decimal>,
) -> ResolvedRate {
    let best = rates
        .iter()
        .filter(|r| r.is_active && r.covers(entry_date))
        .filter_map(|r| rank(r, user_id, service_type).map(|(score, source)| (score, source, r)))
        .max_by_key(|(score, _, r)| (*score, r.effective_from));

    match (best, firm_default) {
        (Some((_, source, r)), _) => ResolvedRate {
            rate: r.hourly_rate,
            source,
        },
        (None, Some(rate)) => ResolvedRate {
            rate,
            source: RateSource::FirmDefault,
        },
        (None, None) => ResolvedRate {
            rate: Decimal::ZERO,
            source: RateSource::Unrated,
        },
    }
}

/// Whether two `[from, until)` rate windows intersect. `None` is open-ended.
pub fn windows_overlap(
    a_from: NaiveDate,
    a_until: Option<NaiveDate>,
    b_from: NaiveDate,
    b_until: Option<NaiveDate>,
) -> bool {
    let a_starts_before_b_ends = b_until.map_or(true, |until| a_from < until);
    let b_starts_before_a_ends = a_until.map_or(true, |until| b_from < until);
    a_starts_before_b_ends && b_starts_before_a_ends
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rate(
        user_id: Option<Uuid>,
        service_type: Option<&str>,
        hourly_rate: Decimal,
        from: &str,
        until: Option<&str>,
    ) -> BillingRate {
        BillingRate {
            billing_rate_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            user_id,
            service_type: service_type.map(str::to_string),
            hourly_rate,
            effective_from: date(from),
            effective_until: until.map(date),
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_specificity_order() {
        let user = Uuid::new_v4();
        let rates = vec![
            rate(None, None, dec!(100), "2024-01-01", None),
            rate(Some(user), None, dec!(200), "2024-01-01", None),
            rate(None, Some("litigation"), dec!(300), "2024-01-01", None),
            rate(Some(user), Some("litigation"), dec!(400), "2024-01-01", None),
        ];
        let day = date("2024-06-10");

        let resolved = resolve_rate(&rates, user, Some("litigation"), day, None);
        assert_eq!(resolved.rate, dec!(400));
        assert_eq!(resolved.source, RateSource::UserService);

        let resolved = resolve_rate(&rates[..3], user, Some("litigation"), day, None);
        assert_eq!(resolved.source, RateSource::TenantService);

        let resolved = resolve_rate(&rates, user, Some("advisory"), day, None);
        assert_eq!(resolved.rate, dec!(200));
        assert_eq!(resolved.source, RateSource::UserStandard);

        let resolved = resolve_rate(&rates, Uuid::new_v4(), None, day, None);
        assert_eq!(resolved.rate, dec!(100));
        assert_eq!(resolved.source, RateSource::TenantStandard);
    }

    #[test]
    fn test_other_users_rate_never_applies() {
        let rates = vec![rate(Some(Uuid::new_v4()), None, dec!(900), "2024-01-01", None)];
        let resolved = resolve_rate(&rates, Uuid::new_v4(), None, date("2024-06-10"), None);
        assert_eq!(resolved.source, RateSource::Unrated);
        assert_eq!(resolved.rate, Decimal::ZERO);
    }

    #[test]
    fn test_tie_broken_by_latest_effective_from() {
        let user = Uuid::new_v4();
        let rates = vec![
            rate(Some(user), None, dec!(150), "2024-01-01", None),
            rate(Some(user), None, dec!(180), "2024-03-01", None),
        ];
        let resolved = resolve_rate(&rates, user, None, date("2024-06-10"), None);
        assert_eq!(resolved.rate, dec!(180));
    }

    #[test]
    fn test_window_is_half_open() {
        let user = Uuid::new_v4();
        let rates = vec![rate(Some(user), None, dec!(150), "2024-01-01", Some("2024-02-01"))];

        let inside = resolve_rate(&rates, user, None, date("2024-01-31"), None);
        assert_eq!(inside.rate, dec!(150));

        let at_end = resolve_rate(&rates, user, None, date("2024-02-01"), Some(dec!(90)));
        assert_eq!(at_end.rate, dec!(90));
        assert_eq!(at_end.source, RateSource::FirmDefault);
    }

    #[test]
    fn test_inactive_rates_are_skipped() {
        let user = Uuid::new_v4();
        let mut inactive = rate(Some(user), None, dec!(500), "2024-01-01", None);
        inactive.is_active = false;
        let resolved = resolve_rate(&[inactive], user, None, date("2024-06-10"), None);
        assert_eq!(resolved.source, RateSource::Unrated);
    }

    #[test]
    fn test_windows_overlap() {
        let d = date;
        assert!(windows_overlap(d("2024-01-01"), None, d("2025-01-01"), None));
        assert!(!windows_overlap(
            d("2024-01-01"),
            Some(d("2024-02-01")),
            d("2024-02-01"),
            None
        ));
        assert!(windows_overlap(
            d("2024-01-01"),
            Some(d("2024-02-02")),
            d("2024-02-01"),
            Some(d("2024-03-01"))
        ));
    }
}
