use std::time::Duration;

use meter_store::{db::SyncOutcome, domain::{ReadingPoint, Resolution}};
use time::OffsetDateTime;

use crate::error::SyncError;

/// Operational event stream of the sync engine. Every method defaults to a
/// no-op so sinks only implement what they care about.
pub trait SyncEvents: Send + Sync + 'static {
    fn url_fetched(&self, _url: &str) {}
    fn rate_limited(&self, _url: &str, _sleep: Duration) {}
    fn payload_malformed(&self, _url: &str, _error: &str) {}
    fn grouping_rejected(&self, _row_id: i64, _error: &str) {}
    fn token_renewed(&self, _credentials_id: i64) {}
    fn window_resolved(
        &self,
        _meter_id: i64,
        _resolution: Resolution,
        _start: OffsetDateTime,
        _end: OffsetDateTime,
        _full_backfill: bool,
    ) {
    }
    fn sync_applied(&self, _meter_id: i64, _resolution: Resolution, _outcome: &SyncOutcome) {}
    fn point_inserted(&self, _meter_id: i64, _resolution: Resolution, _point: &ReadingPoint) {}
    fn sync_completed(&self, _meter_id: i64, _resolution: Resolution, _fetched: usize, _inserted: usize) {}
    fn sync_failed(&self, _meter_id: i64, _resolution: Resolution, _error: &SyncError) {}
    fn relative_value_updated(&self, _row_id: i64, _meter_id: i64, _value: i32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl SyncEvents for NoopEvents {}

/// Emits `tracing` events and `metrics` counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl SyncEvents for TracingEvents {
    fn url_fetched(&self, url: &str) {
        metrics::counter!("remote_requests_total").increment(1);
        tracing::debug!(url, "fetched remote url");
    }

    fn rate_limited(&self, url: &str, sleep: Duration) {
        metrics::counter!("remote_rate_limited_total").increment(1);
        tracing::warn!(url, sleep_secs = sleep.as_secs(), "rate limited, retrying once");
    }

    fn payload_malformed(&self, url: &str, error: &str) {
        metrics::counter!("remote_malformed_payloads_total").increment(1);
        tracing::warn!(url, error, "malformed payload treated as empty");
    }

    fn grouping_rejected(&self, row_id: i64, error: &str) {
        tracing::warn!(row_id, error, "relative value row has invalid grouping, skipped");
    }

    fn token_renewed(&self, credentials_id: i64) {
        tracing::info!(credentials_id, "access token renewed");
    }

    fn window_resolved(
        &self,
        meter_id: i64,
        resolution: Resolution,
        start: OffsetDateTime,
        end: OffsetDateTime,
        full_backfill: bool,
    ) {
        tracing::debug!(
            meter_id,
            %resolution,
            %start,
            %end,
            full_backfill,
            "fetch window resolved"
        );
    }

    fn sync_applied(&self, meter_id: i64, resolution: Resolution, outcome: &SyncOutcome) {
        metrics::counter!("meter_sync_rows_upserted_total").increment(outcome.upserted);
        metrics::counter!("meter_sync_rows_purged_total")
            .increment(outcome.purged_stale + outcome.purged_nulls);
        tracing::debug!(
            meter_id,
            %resolution,
            purged_stale = outcome.purged_stale,
            purged_nulls = outcome.purged_nulls,
            upserted = outcome.upserted,
            "purge and upsert applied"
        );
    }

    fn point_inserted(&self, meter_id: i64, resolution: Resolution, point: &ReadingPoint) {
        tracing::trace!(
            meter_id,
            %resolution,
            recorded_at = %point.recorded_at,
            value = ?point.value,
            "reading stored"
        );
    }

    fn sync_completed(&self, meter_id: i64, resolution: Resolution, fetched: usize, inserted: usize) {
        metrics::counter!("meter_sync_completed_total").increment(1);
        tracing::info!(meter_id, %resolution, fetched, inserted, "meter synced");
    }

    fn sync_failed(&self, meter_id: i64, resolution: Resolution, error: &SyncError) {
        metrics::counter!("meter_sync_failed_total").increment(1);
        tracing::warn!(meter_id, %resolution, error = %error, "meter sync failed");
    }

    fn relative_value_updated(&self, row_id: i64, meter_id: i64, value: i32) {
        metrics::counter!("relative_value_updates_total").increment(1);
        tracing::debug!(row_id, meter_id, value, "relative value updated");
    }
}
