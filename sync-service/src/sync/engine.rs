use std::collections::BTreeMap;

use meter_store::{
    db::{SyncBatch, SyncOutcome},
    domain::{Meter, ReadingPoint, Resolution},
};
use time::OffsetDateTime;

use super::SyncContext;
use crate::{error::SyncError, relative, retention::RetentionPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub window_start: OffsetDateTime,
    /// No non-null reading was stored, so the whole horizon was requested.
    pub full_backfill: bool,
    pub fetched: usize,
    pub outcome: SyncOutcome,
    /// Latest non-null point among the stored ones.
    pub last_value: Option<ReadingPoint>,
}

/// Incrementally sync one tier of one meter.
///
/// The tier's last-attempt marker is first set to `now - backoff`, so a
/// failing meter is retried only after the backoff elapses, and is moved to
/// `now` once the sync finishes. Readings are written in one batch.
pub async fn sync_meter(
    ctx: &SyncContext,
    meter: &Meter,
    resolution: Resolution,
) -> Result<SyncReport, SyncError> {
    let window = RetentionPolicy::window(resolution).ok_or_else(|| {
        SyncError::Precondition(format!("{resolution} readings are not kept locally"))
    })?;

    let now = ctx.clock.now();
    ctx.store
        .mark_attempt(meter.id, resolution, window.provisional_marker(now))
        .await?;

    let horizon = window.horizon_at(now);
    let latest = ctx.store.latest_recorded(meter.id, resolution).await?;
    let full_backfill = latest.is_none();
    let start = latest.unwrap_or(horizon);
    ctx.events
        .window_resolved(meter.id, resolution, start, now, full_backfill);

    let fetched = ctx
        .client
        .fetch_meter_window(&meter.data_url(), resolution, start, now)
        .await?;

    let mut report = SyncReport {
        window_start: start,
        full_backfill,
        fetched: fetched.points.len(),
        outcome: SyncOutcome::default(),
        last_value: None,
    };

    if !fetched.points.is_empty() {
        // One point per instant; a later duplicate in the payload wins.
        let points: BTreeMap<OffsetDateTime, ReadingPoint> = fetched
            .points
            .into_iter()
            .filter(|p| p.recorded_at > start && p.recorded_at >= horizon)
            .map(|p| (p.recorded_at, p))
            .collect();

        let batch = SyncBatch {
            purge_before: horizon,
            recheck_from: start,
            points: points.into_values().collect(),
        };
        report.outcome = ctx.store.apply_sync(meter.id, resolution, &batch).await?;
        ctx.events.sync_applied(meter.id, resolution, &report.outcome);
        for point in &batch.points {
            ctx.events.point_inserted(meter.id, resolution, point);
        }

        report.last_value = batch
            .points
            .iter()
            .filter(|p| p.value.is_some())
            .max_by_key(|p| p.recorded_at)
            .copied();
    }

    if let (Resolution::Live, Some(ReadingPoint { recorded_at, value: Some(value) })) =
        (resolution, report.last_value)
    {
        ctx.store.update_current(meter.id, value, recorded_at).await?;
        relative::refresh_for_meter(ctx, meter, value).await?;
    }

    if resolution == Resolution::Month {
        if let Some(units) = fetched.units.as_deref() {
            ctx.store.update_units(meter.id, units).await?;
        }
    }

    ctx.store
        .mark_attempt(meter.id, resolution, ctx.clock.now())
        .await?;
    ctx.events.sync_completed(
        meter.id,
        resolution,
        report.fetched,
        report.outcome.upserted as usize,
    );

    Ok(report)
}
