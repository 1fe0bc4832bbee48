use meter_store::domain::Resolution;
use time::{util::days_in_year_month, Date, Duration, Month, OffsetDateTime};

/// How far back a tier is kept and how long a failed attempt waits before
/// the meter is due again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    pub horizon: Horizon,
    pub backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Fixed(Duration),
    /// Calendar months, clamped to the last day of the target month.
    Months(u32),
}

impl RetentionWindow {
    /// Oldest timestamp worth keeping or backfilling at `now`.
    pub fn horizon_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        match self.horizon {
            Horizon::Fixed(d) => now - d,
            Horizon::Months(n) => months_before(now, n),
        }
    }

    /// Value written as the last-attempt marker before any work starts.
    pub fn provisional_marker(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - self.backoff
    }
}

pub struct RetentionPolicy;

impl RetentionPolicy {
    /// Tiers kept locally. `day` can be fetched but is not cached.
    pub const SYNCED: [Resolution; 4] = [
        Resolution::Live,
        Resolution::QuarterHour,
        Resolution::Hour,
        Resolution::Month,
    ];

    pub const fn window(resolution: Resolution) -> Option<RetentionWindow> {
        match resolution {
            Resolution::Live => Some(RetentionWindow {
                horizon: Horizon::Fixed(Duration::hours(2)),
                backoff: Duration::seconds(120),
            }),
            Resolution::QuarterHour => Some(RetentionWindow {
                horizon: Horizon::Fixed(Duration::weeks(2)),
                backoff: Duration::seconds(300),
            }),
            Resolution::Hour => Some(RetentionWindow {
                horizon: Horizon::Months(2),
                backoff: Duration::seconds(600),
            }),
            Resolution::Month => Some(RetentionWindow {
                horizon: Horizon::Months(24),
                backoff: Duration::seconds(43200),
            }),
            Resolution::Day => None,
        }
    }

    /// Finest synced tier whose horizon still covers `from`.
    pub fn pick_resolution(from: OffsetDateTime, now: OffsetDateTime) -> Resolution {
        Self::SYNCED[..3]
            .iter()
            .copied()
            .find(|r| matches!(Self::window(*r), Some(w) if from >= w.horizon_at(now)))
            .unwrap_or(Resolution::Month)
    }
}

pub(crate) fn months_before(at: OffsetDateTime, months: u32) -> OffsetDateTime {
    let total = at.year() * 12 + i32::from(u8::from(at.month())) - 1 - months as i32;
    let year = total.div_euclid(12);
    let month = Month::try_from((total.rem_euclid(12) + 1) as u8).unwrap_or(Month::January);
    let day = at.day().min(days_in_year_month(year, month));

    match Date::from_calendar_date(year, month, day) {
        Ok(date) => at.replace_date(date),
        Err(_) => at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn table_matches_tier_constants() {
        let now = datetime!(2024-05-15 12:00:00 UTC);

        let live = RetentionPolicy::window(Resolution::Live).unwrap();
        assert_eq!(live.horizon_at(now), datetime!(2024-05-15 10:00:00 UTC));
        assert_eq!(live.backoff, Duration::seconds(120));

        let qh = RetentionPolicy::window(Resolution::QuarterHour).unwrap();
        assert_eq!(qh.horizon_at(now), datetime!(2024-05-01 12:00:00 UTC));
        assert_eq!(qh.backoff, Duration::seconds(300));

        let hour = RetentionPolicy::window(Resolution::Hour).unwrap();
        assert_eq!(hour.horizon_at(now), datetime!(2024-03-15 12:00:00 UTC));
        assert_eq!(hour.backoff, Duration::seconds(600));

        let month = RetentionPolicy::window(Resolution::Month).unwrap();
        assert_eq!(month.horizon_at(now), datetime!(2022-05-15 12:00:00 UTC));
        assert_eq!(month.backoff, Duration::seconds(43200));

        assert!(RetentionPolicy::window(Resolution::Day).is_none());
    }

    #[test]
    fn calendar_horizon_clamps_to_month_end_and_crosses_years() {
        let hour = RetentionPolicy::window(Resolution::Hour).unwrap();
        assert_eq!(
            hour.horizon_at(datetime!(2024-04-30 08:00:00 UTC)),
            datetime!(2024-02-29 08:00:00 UTC)
        );
        assert_eq!(
            hour.horizon_at(datetime!(2024-01-10 08:00:00 UTC)),
            datetime!(2023-11-10 08:00:00 UTC)
        );

        let month = RetentionPolicy::window(Resolution::Month).unwrap();
        assert_eq!(
            month.horizon_at(datetime!(2024-02-29 00:00:00 UTC)),
            datetime!(2022-02-28 00:00:00 UTC)
        );
    }

    #[test]
    fn provisional_marker_subtracts_backoff() {
        let now = datetime!(2024-05-15 12:00:00 UTC);
        let live = RetentionPolicy::window(Resolution::Live).unwrap();
        assert_eq!(live.provisional_marker(now), datetime!(2024-05-15 11:58:00 UTC));
    }

    #[test]
    fn picks_finest_tier_covering_range() {
        let now = datetime!(2024-05-15 12:00:00 UTC);
        assert_eq!(
            RetentionPolicy::pick_resolution(datetime!(2024-05-15 11:00:00 UTC), now),
            Resolution::Live
        );
        assert_eq!(
            RetentionPolicy::pick_resolution(datetime!(2024-05-10 00:00:00 UTC), now),
            Resolution::QuarterHour
        );
        assert_eq!(
            RetentionPolicy::pick_resolution(datetime!(2024-04-01 00:00:00 UTC), now),
            Resolution::Hour
        );
        assert_eq!(
            RetentionPolicy::pick_resolution(datetime!(2023-01-01 00:00:00 UTC), now),
            Resolution::Month
        );
    }
}
