pub mod memory;
pub mod postgres;

use time::OffsetDateTime;

use crate::domain::{
    ApiCredentials, Meter, ReadingPoint, RelativeValueRow, RelativeValueTarget, ReportingZone, Resolution,
};

pub use memory::MemoryMeterStore;
pub use postgres::PgMeterStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored value: {0}")]
    Invalid(String),
}

/// Writes produced by one non-empty sync of a single (meter, tier).
///
/// Implementations apply the batch atomically: purge rows older than
/// `purge_before`, purge null rows at/after `recheck_from`, then upsert
/// `points` keyed by (meter_id, resolution, recorded_at).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    pub purge_before: OffsetDateTime,
    pub recheck_from: OffsetDateTime,
    pub points: Vec<ReadingPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub purged_stale: u64,
    pub purged_nulls: u64,
    pub upserted: u64,
}

/// Historical cohort selection for relative-value computation.
///
/// Matches non-null readings of one tier whose hour in `zone` equals
/// `hour_of_day` and whose day-of-week there (1 = Sunday) is in `days`,
/// recorded strictly between `since` (if any) and `until`. Results are
/// most-recent first and truncated to `limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortQuery {
    pub meter_id: i64,
    pub resolution: Resolution,
    pub hour_of_day: u8,
    pub days: Vec<u8>,
    pub zone: ReportingZone,
    pub since: Option<OffsetDateTime>,
    pub until: OffsetDateTime,
    pub limit: Option<usize>,
}

impl CohortQuery {
    pub fn matches(&self, recorded_at: OffsetDateTime) -> bool {
        if recorded_at >= self.until {
            return false;
        }
        if matches!(self.since, Some(since) if recorded_at <= since) {
            return false;
        }
        let local = self.zone.local(recorded_at);
        local.hour() == self.hour_of_day
            && self.days.contains(&local.weekday().number_from_sunday())
    }
}

/// Persisted meters, readings, credentials and cached relative values.
#[async_trait::async_trait]
pub trait MeterDataStore: Send + Sync {
    async fn api_credentials(&self, id: i64) -> Result<Option<ApiCredentials>, StoreError>;

    async fn save_api_token(
        &self,
        id: i64,
        token: &str,
        issued_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn meter(&self, meter_id: i64) -> Result<Option<Meter>, StoreError>;

    /// In-use meters ordered by the tier's last-attempt marker, oldest first
    /// (never attempted before anything else), ties broken by id.
    async fn meters_due(&self, resolution: Resolution) -> Result<Vec<Meter>, StoreError>;

    async fn mark_attempt(
        &self,
        meter_id: i64,
        resolution: Resolution,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Timestamp of the most recent non-null reading for the tier.
    async fn latest_recorded(
        &self,
        meter_id: i64,
        resolution: Resolution,
    ) -> Result<Option<OffsetDateTime>, StoreError>;

    async fn apply_sync(
        &self,
        meter_id: i64,
        resolution: Resolution,
        batch: &SyncBatch,
    ) -> Result<SyncOutcome, StoreError>;

    async fn update_current(
        &self,
        meter_id: i64,
        value: f64,
        recorded_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn update_units(&self, meter_id: i64, units: &str) -> Result<(), StoreError>;

    /// Rows registered against the meter UUID that carry a grouping.
    async fn relative_value_rows(&self, meter_uuid: &str) -> Result<Vec<RelativeValueRow>, StoreError>;

    /// Every row with a grouping, joined to its meter.
    async fn relative_value_targets(&self) -> Result<Vec<RelativeValueTarget>, StoreError>;

    async fn cohort_values(&self, query: &CohortQuery) -> Result<Vec<f64>, StoreError>;

    async fn store_relative_value(&self, row_id: i64, value: i32) -> Result<(), StoreError>;

    /// Readings with `from < recorded_at < to`, oldest first.
    async fn readings(
        &self,
        meter_id: i64,
        resolution: Resolution,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>, StoreError>;
}
