use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use time::OffsetDateTime;

use super::{CohortQuery, MeterDataStore, StoreError, SyncBatch, SyncOutcome};
use crate::domain::{
    ApiCredentials, Meter, ReadingPoint, RelativeValueRow, RelativeValueTarget, Resolution,
};

type ReadingKey = (i64, Resolution, OffsetDateTime);

#[derive(Default)]
struct MemoryState {
    credentials: HashMap<i64, ApiCredentials>,
    meters: BTreeMap<i64, Meter>,
    readings: BTreeMap<ReadingKey, Option<f64>>,
    relative_values: BTreeMap<i64, RelativeValueRow>,
}

/// Process-local `MeterDataStore` with the same semantics as `PgMeterStore`.
#[derive(Default)]
pub struct MemoryMeterStore {
    state: Mutex<MemoryState>,
}

impl MemoryMeterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_credentials(&self, credentials: ApiCredentials) {
        self.state().credentials.insert(credentials.id, credentials);
    }

    pub fn insert_meter(&self, meter: Meter) {
        self.state().meters.insert(meter.id, meter);
    }

    pub fn insert_reading(&self, meter_id: i64, resolution: Resolution, point: ReadingPoint) {
        self.state()
            .readings
            .insert((meter_id, resolution, point.recorded_at), point.value);
    }

    pub fn insert_relative_value(&self, row: RelativeValueRow) {
        self.state().relative_values.insert(row.id, row);
    }

    /// All stored points of one tier, oldest first.
    pub fn points(&self, meter_id: i64, resolution: Resolution) -> Vec<ReadingPoint> {
        self.state()
            .readings
            .iter()
            .filter(|((m, r, _), _)| *m == meter_id && *r == resolution)
            .map(|((_, _, at), value)| ReadingPoint {
                recorded_at: *at,
                value: *value,
            })
            .collect()
    }

    pub fn relative_value(&self, row_id: i64) -> Option<i32> {
        self.state()
            .relative_values
            .get(&row_id)
            .and_then(|r| r.relative_value)
    }

    pub fn credentials(&self, id: i64) -> Option<ApiCredentials> {
        self.state().credentials.get(&id).cloned()
    }
}

#[async_trait::async_trait]
impl MeterDataStore for MemoryMeterStore {
    async fn api_credentials(&self, id: i64) -> Result<Option<ApiCredentials>, StoreError> {
        Ok(self.credentials(id))
    }

    async fn save_api_token(
        &self,
        id: i64,
        token: &str,
        issued_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let credentials = state
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::Invalid(format!("no api credentials with id {id}")))?;
        credentials.token = Some(token.to_string());
        credentials.token_updated = Some(issued_at);
        Ok(())
    }

    async fn meter(&self, meter_id: i64) -> Result<Option<Meter>, StoreError> {
        Ok(self.state().meters.get(&meter_id).cloned())
    }

    async fn meters_due(&self, resolution: Resolution) -> Result<Vec<Meter>, StoreError> {
        let mut due: Vec<Meter> = self
            .state()
            .meters
            .values()
            .filter(|m| m.in_use)
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.last_attempts.get(resolution), m.id));
        Ok(due)
    }

    async fn mark_attempt(
        &self,
        meter_id: i64,
        resolution: Resolution,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        if let Some(meter) = self.state().meters.get_mut(&meter_id) {
            meter.last_attempts.set(resolution, at);
        }
        Ok(())
    }

    async fn latest_recorded(
        &self,
        meter_id: i64,
        resolution: Resolution,
    ) -> Result<Option<OffsetDateTime>, StoreError> {
        Ok(self
            .state()
            .readings
            .iter()
            .filter(|((m, r, _), value)| *m == meter_id && *r == resolution && value.is_some())
            .map(|((_, _, at), _)| *at)
            .next_back())
    }

    async fn apply_sync(
        &self,
        meter_id: i64,
        resolution: Resolution,
        batch: &SyncBatch,
    ) -> Result<SyncOutcome, StoreError> {
        let mut state = self.state();
        let mut outcome = SyncOutcome::default();

        state.readings.retain(|(m, r, at), value| {
            if *m != meter_id || *r != resolution {
                return true;
            }
            if *at < batch.purge_before {
                outcome.purged_stale += 1;
                false
            } else if *at >= batch.recheck_from && value.is_none() {
                outcome.purged_nulls += 1;
                false
            } else {
                true
            }
        });

        for p in &batch.points {
            state
                .readings
                .insert((meter_id, resolution, p.recorded_at), p.value);
            outcome.upserted += 1;
        }

        Ok(outcome)
    }

    async fn update_current(
        &self,
        meter_id: i64,
        value: f64,
        recorded_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        if let Some(meter) = self.state().meters.get_mut(&meter_id) {
            meter.current = Some(value);
            meter.last_updated = Some(recorded_at);
        }
        Ok(())
    }

    async fn update_units(&self, meter_id: i64, units: &str) -> Result<(), StoreError> {
        if let Some(meter) = self.state().meters.get_mut(&meter_id) {
            meter.units = Some(units.to_string());
        }
        Ok(())
    }

    async fn relative_value_rows(&self, meter_uuid: &str) -> Result<Vec<RelativeValueRow>, StoreError> {
        Ok(self
            .state()
            .relative_values
            .values()
            .filter(|r| r.meter_uuid == meter_uuid && r.grouping.is_some())
            .cloned()
            .collect())
    }

    async fn relative_value_targets(&self) -> Result<Vec<RelativeValueTarget>, StoreError> {
        let state = self.state();
        Ok(state
            .relative_values
            .values()
            .filter(|r| r.grouping.is_some())
            .filter_map(|r| {
                state
                    .meters
                    .values()
                    .find(|m| m.uuid == r.meter_uuid)
                    .map(|m| RelativeValueTarget {
                        row: r.clone(),
                        meter_id: m.id,
                        current: m.current,
                    })
            })
            .collect())
    }

    async fn cohort_values(&self, query: &CohortQuery) -> Result<Vec<f64>, StoreError> {
        let state = self.state();
        let matching = state
            .readings
            .iter()
            .rev()
            .filter(|((m, r, at), _)| {
                *m == query.meter_id && *r == query.resolution && query.matches(*at)
            })
            .filter_map(|(_, value)| *value);

        Ok(match query.limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }

    async fn store_relative_value(&self, row_id: i64, value: i32) -> Result<(), StoreError> {
        if let Some(row) = self.state().relative_values.get_mut(&row_id) {
            row.relative_value = Some(value);
        }
        Ok(())
    }

    async fn readings(
        &self,
        meter_id: i64,
        resolution: Resolution,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>, StoreError> {
        Ok(self
            .points(meter_id, resolution)
            .into_iter()
            .filter(|p| p.recorded_at > from && p.recorded_at < to)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TierMarkers;
    use time::macros::datetime;

    fn meter(id: i64, in_use: bool, hour_attempt: Option<OffsetDateTime>) -> Meter {
        Meter {
            id,
            uuid: format!("uuid-{id}"),
            url: format!("https://api.example.com/meters/{id}"),
            units: None,
            current: None,
            last_updated: None,
            in_use,
            last_attempts: TierMarkers {
                hour: hour_attempt,
                ..TierMarkers::default()
            },
        }
    }

    fn point(at: OffsetDateTime, value: Option<f64>) -> ReadingPoint {
        ReadingPoint { recorded_at: at, value }
    }

    #[tokio::test]
    async fn meters_due_orders_never_attempted_first_and_skips_unused() {
        let store = MemoryMeterStore::new();
        store.insert_meter(meter(1, true, Some(datetime!(2024-01-01 10:00:00 UTC))));
        store.insert_meter(meter(2, true, None));
        store.insert_meter(meter(3, true, Some(datetime!(2024-01-01 09:00:00 UTC))));
        store.insert_meter(meter(4, false, None));

        let due = store.meters_due(Resolution::Hour).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn apply_sync_purges_then_upserts_within_one_tier() {
        let store = MemoryMeterStore::new();
        store.insert_reading(1, Resolution::Live, point(datetime!(2024-01-01 08:00:00 UTC), Some(1.0)));
        store.insert_reading(1, Resolution::Live, point(datetime!(2024-01-01 10:00:00 UTC), Some(2.0)));
        store.insert_reading(1, Resolution::Live, point(datetime!(2024-01-01 10:01:00 UTC), None));
        store.insert_reading(1, Resolution::Hour, point(datetime!(2024-01-01 08:00:00 UTC), Some(9.0)));

        let batch = SyncBatch {
            purge_before: datetime!(2024-01-01 09:00:00 UTC),
            recheck_from: datetime!(2024-01-01 10:00:00 UTC),
            points: vec![point(datetime!(2024-01-01 10:01:00 UTC), Some(3.0))],
        };
        let outcome = store.apply_sync(1, Resolution::Live, &batch).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome {
                purged_stale: 1,
                purged_nulls: 1,
                upserted: 1
            }
        );
        assert_eq!(
            store.points(1, Resolution::Live),
            vec![
                point(datetime!(2024-01-01 10:00:00 UTC), Some(2.0)),
                point(datetime!(2024-01-01 10:01:00 UTC), Some(3.0)),
            ]
        );
        assert_eq!(store.points(1, Resolution::Hour).len(), 1);
    }

    #[tokio::test]
    async fn latest_recorded_ignores_null_readings() {
        let store = MemoryMeterStore::new();
        store.insert_reading(1, Resolution::Live, point(datetime!(2024-01-01 10:00:00 UTC), Some(2.0)));
        store.insert_reading(1, Resolution::Live, point(datetime!(2024-01-01 10:05:00 UTC), None));

        let latest = store.latest_recorded(1, Resolution::Live).await.unwrap();
        assert_eq!(latest, Some(datetime!(2024-01-01 10:00:00 UTC)));
    }
}
