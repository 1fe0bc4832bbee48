use std::fmt;

use time::{OffsetDateTime, PrimitiveDateTime};
use time_tz::{timezones, OffsetDateTimeExt, TimeZone, Tz};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown time zone '{0}'")]
pub struct UnknownZone(pub String);

/// IANA zone in which hour-of-day, day-of-week and calendar days are read.
/// Offsets follow daylight saving transitions.
#[derive(Clone, Copy)]
pub struct ReportingZone(&'static Tz);

impl ReportingZone {
    pub fn from_name(name: &str) -> Result<Self, UnknownZone> {
        timezones::get_by_name(name.trim())
            .map(Self)
            .ok_or_else(|| UnknownZone(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// `at` expressed with the offset in effect at that instant.
    pub fn local(&self, at: OffsetDateTime) -> OffsetDateTime {
        at.to_timezone(self.0)
    }

    /// Interpret a wall-clock time in this zone. A time skipped by a
    /// transition takes the offset after it; a repeated time takes the
    /// offset before it.
    pub fn assume_local(&self, at: PrimitiveDateTime) -> OffsetDateTime {
        let first = self.local(at.assume_utc()).offset();
        let settled = self.local(at.assume_offset(first)).offset();
        at.assume_offset(settled)
    }
}

impl fmt::Debug for ReportingZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReportingZone").field(&self.name()).finish()
    }
}

impl PartialEq for ReportingZone {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ReportingZone {}
