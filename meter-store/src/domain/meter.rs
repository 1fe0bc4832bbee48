use time::OffsetDateTime;

use super::Resolution;

/// Per-tier last-attempt markers. `None` means the tier was never attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierMarkers {
    pub live: Option<OffsetDateTime>,
    pub quarterhour: Option<OffsetDateTime>,
    pub hour: Option<OffsetDateTime>,
    pub day: Option<OffsetDateTime>,
    pub month: Option<OffsetDateTime>,
}

impl TierMarkers {
    pub fn get(&self, resolution: Resolution) -> Option<OffsetDateTime> {
        match resolution {
            Resolution::Live => self.live,
            Resolution::QuarterHour => self.quarterhour,
            Resolution::Hour => self.hour,
            Resolution::Day => self.day,
            Resolution::Month => self.month,
        }
    }

    pub fn set(&mut self, resolution: Resolution, at: OffsetDateTime) {
        let slot = match resolution {
            Resolution::Live => &mut self.live,
            Resolution::QuarterHour => &mut self.quarterhour,
            Resolution::Hour => &mut self.hour,
            Resolution::Day => &mut self.day,
            Resolution::Month => &mut self.month,
        };
        *slot = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Meter {
    pub id: i64,
    /// External UUID assigned by the building-management API.
    pub uuid: String,
    pub url: String,
    pub units: Option<String>,
    pub current: Option<f64>,
    pub last_updated: Option<OffsetDateTime>,
    /// At least one consumer (gauge, orb, time series) references this meter.
    pub in_use: bool,
    pub last_attempts: TierMarkers,
}

impl Meter {
    /// Readings endpoint for this meter.
    pub fn data_url(&self) -> String {
        format!("{}/data", self.url.trim_end_matches('/'))
    }
}
