use std::{fmt, str::FromStr};

/// Granularity of stored readings. Each tier is retained and tracked for
/// staleness independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Resolution {
    Live,
    QuarterHour,
    Hour,
    Day,
    Month,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("resolution must be live/quarterhour/hour/day/month, got '{0}'")]
pub struct UnknownResolution(pub String);

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Live,
        Resolution::QuarterHour,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Month,
    ];

    /// Wire name used both by the remote API and the `meter_data.resolution` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::QuarterHour => "quarterhour",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    /// Column of `meters` holding this tier's last-attempt marker.
    pub const fn last_attempt_column(self) -> &'static str {
        match self {
            Self::Live => "live_last_attempt",
            Self::QuarterHour => "quarterhour_last_attempt",
            Self::Hour => "hour_last_attempt",
            Self::Day => "day_last_attempt",
            Self::Month => "month_last_attempt",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = UnknownResolution;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str() == lowered)
            .ok_or_else(|| UnknownResolution(s.to_string()))
    }
}
