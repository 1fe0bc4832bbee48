use meter_store::domain::{daily_averages, ReadingPoint, Resolution};
use time::OffsetDateTime;

use crate::{error::SyncError, retention::RetentionPolicy, sync::SyncContext};

/// Stored readings with `from < t < to`, oldest first. Without an explicit
/// tier the finest one whose horizon still covers `from` is used.
pub async fn load_series(
    ctx: &SyncContext,
    meter_id: i64,
    from: OffsetDateTime,
    to: OffsetDateTime,
    resolution: Option<Resolution>,
) -> Result<Vec<ReadingPoint>, SyncError> {
    let resolution =
        resolution.unwrap_or_else(|| RetentionPolicy::pick_resolution(from, ctx.clock.now()));
    Ok(ctx.store.readings(meter_id, resolution, from, to).await?)
}

/// Hour-tier readings averaged per local calendar day.
pub async fn daily_series(
    ctx: &SyncContext,
    meter_id: i64,
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> Result<Vec<ReadingPoint>, SyncError> {
    let hourly = ctx
        .store
        .readings(meter_id, Resolution::Hour, from, to)
        .await?;
    Ok(daily_averages(&hourly, ctx.reporting_zone))
}
