use meter_store::{
    db::CohortQuery,
    domain::{ReportingZone, Resolution},
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::retention::months_before;

#[derive(thiserror::Error, Debug)]
pub enum GroupingError {
    #[error("invalid grouping json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("day {0} is outside 1..=7")]
    InvalidDay(u8),
    #[error("grouping rule has no days")]
    EmptyDays,
    #[error("grouping rule needs exactly one of `npoints` or `start`")]
    Sampling,
    #[error("npoints must be positive")]
    ZeroPoints,
    #[error("invalid start offset '{0}'")]
    InvalidOffset(String),
}

/// Days of week, 1 = Sunday through 7 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaySet(u8);

impl DaySet {
    pub fn from_days(days: &[u8]) -> Result<Self, GroupingError> {
        if days.is_empty() {
            return Err(GroupingError::EmptyDays);
        }
        let mut bits = 0u8;
        for &day in days {
            if !(1..=7).contains(&day) {
                return Err(GroupingError::InvalidDay(day));
            }
            bits |= 1 << (day - 1);
        }
        Ok(Self(bits))
    }

    pub fn contains(&self, day: u8) -> bool {
        (1..=7).contains(&day) && self.0 & (1 << (day - 1)) != 0
    }

    pub fn days(&self) -> Vec<u8> {
        (1..=7).filter(|d| self.contains(*d)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// A non-positive relative offset such as `-2 weeks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeOffset {
    pub amount: u32,
    pub unit: OffsetUnit,
}

impl RelativeOffset {
    pub fn parse(raw: &str) -> Result<Self, GroupingError> {
        let invalid = || GroupingError::InvalidOffset(raw.to_string());

        let mut parts = raw.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        if amount > 0 {
            return Err(invalid());
        }
        let amount = u32::try_from(amount.unsigned_abs()).map_err(|_| invalid())?;

        let unit = match unit.to_ascii_lowercase().trim_end_matches('s') {
            "sec" | "second" => OffsetUnit::Second,
            "min" | "minute" => OffsetUnit::Minute,
            "hour" => OffsetUnit::Hour,
            "day" => OffsetUnit::Day,
            "week" => OffsetUnit::Week,
            "month" => OffsetUnit::Month,
            "year" => OffsetUnit::Year,
            _ => return Err(invalid()),
        };

        Ok(Self { amount, unit })
    }

    /// `now` moved back by the offset.
    pub fn before(&self, now: OffsetDateTime) -> OffsetDateTime {
        let n = i64::from(self.amount);
        match self.unit {
            OffsetUnit::Second => now - Duration::seconds(n),
            OffsetUnit::Minute => now - Duration::minutes(n),
            OffsetUnit::Hour => now - Duration::hours(n),
            OffsetUnit::Day => now - Duration::days(n),
            OffsetUnit::Week => now - Duration::weeks(n),
            OffsetUnit::Month => months_before(now, self.amount),
            OffsetUnit::Year => months_before(now, self.amount.saturating_mul(12)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// The N most recent matching hour readings.
    NMostRecent(usize),
    /// Every matching hour reading since the offset.
    TimeWindow(RelativeOffset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingRule {
    pub days: DaySet,
    pub sampling: Sampling,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    days: Vec<u8>,
    npoints: Option<usize>,
    start: Option<String>,
}

impl TryFrom<RawRule> for GroupingRule {
    type Error = GroupingError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let days = DaySet::from_days(&raw.days)?;
        let sampling = match (raw.npoints, raw.start) {
            (Some(0), None) => return Err(GroupingError::ZeroPoints),
            (Some(n), None) => Sampling::NMostRecent(n),
            (None, Some(start)) => Sampling::TimeWindow(RelativeOffset::parse(&start)?),
            _ => return Err(GroupingError::Sampling),
        };
        Ok(Self { days, sampling })
    }
}

/// Parse the stored grouping column, e.g.
/// `[{"days":[2,3,4,5,6],"npoints":5},{"days":[1,7],"start":"-2 weeks"}]`.
pub fn parse_grouping(json: &str) -> Result<Vec<GroupingRule>, GroupingError> {
    let raw: Vec<RawRule> = serde_json::from_str(json)?;
    raw.into_iter().map(GroupingRule::try_from).collect()
}

/// First rule whose day set contains `day`; later rules are never consulted.
pub fn select_rule(rules: &[GroupingRule], day: u8) -> Option<&GroupingRule> {
    rules.iter().find(|r| r.days.contains(day))
}

impl GroupingRule {
    /// Hour-tier cohort for this rule at `now`, read in the reporting zone.
    pub fn cohort_query(&self, meter_id: i64, now: OffsetDateTime, zone: ReportingZone) -> CohortQuery {
        let (since, limit) = match self.sampling {
            Sampling::NMostRecent(n) => (None, Some(n)),
            Sampling::TimeWindow(start) => (Some(start.before(now)), None),
        };
        CohortQuery {
            meter_id,
            resolution: Resolution::Hour,
            hour_of_day: zone.local(now).hour(),
            days: self.days.days(),
            zone,
            since,
            until: now,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const WEEKDAY_WEEKEND: &str =
        r#"[{"days":[2,3,4,5,6],"npoints":5},{"days":[1,7],"start":"-2 weeks"}]"#;

    #[test]
    fn parses_both_sampling_modes() {
        let rules = parse_grouping(WEEKDAY_WEEKEND).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].sampling, Sampling::NMostRecent(5));
        assert_eq!(rules[0].days.days(), vec![2, 3, 4, 5, 6]);
        assert_eq!(
            rules[1].sampling,
            Sampling::TimeWindow(RelativeOffset {
                amount: 2,
                unit: OffsetUnit::Week
            })
        );
    }

    #[test]
    fn sunday_selects_the_time_window_rule() {
        let rules = parse_grouping(WEEKDAY_WEEKEND).unwrap();
        let rule = select_rule(&rules, 1).unwrap();
        assert!(matches!(rule.sampling, Sampling::TimeWindow(_)));

        let monday = select_rule(&rules, 2).unwrap();
        assert_eq!(monday.sampling, Sampling::NMostRecent(5));
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = parse_grouping(r#"[{"days":[1],"npoints":3},{"days":[1,2],"npoints":9}]"#).unwrap();
        assert_eq!(select_rule(&rules, 1).unwrap().sampling, Sampling::NMostRecent(3));
        assert!(select_rule(&rules, 4).is_none());
    }

    #[test]
    fn rejects_invalid_rules() {
        assert!(matches!(
            parse_grouping(r#"[{"days":[1],"npoints":3,"colour":"red"}]"#),
            Err(GroupingError::Json(_))
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[1.5],"npoints":3}]"#),
            Err(GroupingError::Json(_))
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[8],"npoints":3}]"#),
            Err(GroupingError::InvalidDay(8))
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[],"npoints":3}]"#),
            Err(GroupingError::EmptyDays)
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[1],"npoints":3,"start":"-1 day"}]"#),
            Err(GroupingError::Sampling)
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[1]}]"#),
            Err(GroupingError::Sampling)
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[1],"npoints":0}]"#),
            Err(GroupingError::ZeroPoints)
        ));
        assert!(matches!(
            parse_grouping(r#"[{"days":[1],"start":"+2 weeks"}]"#),
            Err(GroupingError::InvalidOffset(_))
        ));
    }

    #[test]
    fn relative_offsets_move_back_in_time() {
        let now = datetime!(2024-05-31 12:00:00 UTC);
        let two_weeks = RelativeOffset::parse("-2 weeks").unwrap();
        assert_eq!(two_weeks.before(now), datetime!(2024-05-17 12:00:00 UTC));

        let one_month = RelativeOffset::parse("-1 month").unwrap();
        assert_eq!(one_month.before(now), datetime!(2024-04-30 12:00:00 UTC));

        let hours = RelativeOffset::parse("-36 Hours").unwrap();
        assert_eq!(hours.before(now), datetime!(2024-05-30 00:00:00 UTC));

        assert!(RelativeOffset::parse("two weeks").is_err());
        assert!(RelativeOffset::parse("-2 fortnights").is_err());
    }

    #[test]
    fn cohort_query_uses_local_hour_and_rule_days() {
        let rules = parse_grouping(WEEKDAY_WEEKEND).unwrap();
        let now = datetime!(2024-06-16 19:30:00 UTC);
        let zone = ReportingZone::from_name("Etc/GMT+5").unwrap();

        let query = rules[0].cohort_query(42, now, zone);
        assert_eq!(query.meter_id, 42);
        assert_eq!(query.resolution, Resolution::Hour);
        assert_eq!(query.hour_of_day, 14);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.since, None);

        let query = rules[1].cohort_query(42, now, zone);
        assert_eq!(query.days, vec![1, 7]);
        assert_eq!(query.since, Some(datetime!(2024-06-02 19:30:00 UTC)));
        assert_eq!(query.limit, None);
    }
}
