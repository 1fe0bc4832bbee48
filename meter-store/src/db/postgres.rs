use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{CohortQuery, MeterDataStore, StoreError, SyncBatch, SyncOutcome};
use crate::domain::{
    ApiCredentials, Meter, ReadingPoint, RelativeValueRow, RelativeValueTarget, Resolution, TierMarkers,
};

/// Keeps each multi-row upsert well under the Postgres bind parameter limit.
const UPSERT_CHUNK: usize = 1000;

/// SQL rendition of `CohortQuery::matches`; the two must select the same rows.
/// `AT TIME ZONE` with a zone name yields local wall-clock time, DST included.
const COHORT_SQL: &str = r#"
    SELECT value
    FROM meter_data
    WHERE meter_id = $1
      AND resolution = $2
      AND value IS NOT NULL
      AND recorded_at < $3
      AND ($4::timestamptz IS NULL OR recorded_at > $4)
      AND EXTRACT(HOUR FROM recorded_at AT TIME ZONE $5)::int = $6
      AND (EXTRACT(DOW FROM recorded_at AT TIME ZONE $5)::int + 1) = ANY($7)
    ORDER BY recorded_at DESC
    LIMIT $8
"#;

const METER_COLUMNS: &str = r#"
    id,
    bos_uuid,
    url,
    units,
    current,
    last_updated,
    (gauges_using > 0 OR for_orb > 0 OR orb_server > 0 OR timeseries_using > 0) AS in_use,
    live_last_attempt,
    quarterhour_last_attempt,
    hour_last_attempt,
    day_last_attempt,
    month_last_attempt
"#;

#[derive(Debug, sqlx::FromRow)]
struct MeterRow {
    id: i64,
    bos_uuid: String,
    url: String,
    units: Option<String>,
    current: Option<f64>,
    last_updated: Option<OffsetDateTime>,
    in_use: bool,
    live_last_attempt: Option<OffsetDateTime>,
    quarterhour_last_attempt: Option<OffsetDateTime>,
    hour_last_attempt: Option<OffsetDateTime>,
    day_last_attempt: Option<OffsetDateTime>,
    month_last_attempt: Option<OffsetDateTime>,
}

impl From<MeterRow> for Meter {
    fn from(r: MeterRow) -> Self {
        Meter {
            id: r.id,
            uuid: r.bos_uuid,
            url: r.url,
            units: r.units,
            current: r.current,
            last_updated: r.last_updated,
            in_use: r.in_use,
            last_attempts: TierMarkers {
                live: r.live_last_attempt,
                quarterhour: r.quarterhour_last_attempt,
                hour: r.hour_last_attempt,
                day: r.day_last_attempt,
                month: r.month_last_attempt,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    id: i64,
    meter_uuid: String,
    grouping: Option<String>,
    relative_value: Option<i32>,
    permission: Option<String>,
    meter_id: i64,
    current: Option<f64>,
}

/// `MeterDataStore` backed by the dashboard Postgres schema in `sql/schema/`.
#[derive(Clone)]
pub struct PgMeterStore {
    pool: PgPool,
}

impl PgMeterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MeterDataStore for PgMeterStore {
    async fn api_credentials(&self, id: i64) -> Result<Option<ApiCredentials>, StoreError> {
        let row = sqlx::query_as::<_, ApiCredentials>(
            r#"
            SELECT id, client_id, client_secret, username, password, token, token_updated
            FROM api
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save_api_token(
        &self,
        id: i64,
        token: &str,
        issued_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE api SET token = $1, token_updated = $2 WHERE id = $3")
            .bind(token)
            .bind(issued_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn meter(&self, meter_id: i64) -> Result<Option<Meter>, StoreError> {
        let sql = format!("SELECT {METER_COLUMNS} FROM meters WHERE id = $1");
        let row = sqlx::query_as::<_, MeterRow>(&sql)
            .bind(meter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Meter::from))
    }

    async fn meters_due(&self, resolution: Resolution) -> Result<Vec<Meter>, StoreError> {
        let sql = format!(
            r#"
            SELECT {METER_COLUMNS}
            FROM meters
            WHERE gauges_using > 0 OR for_orb > 0 OR orb_server > 0 OR timeseries_using > 0
            ORDER BY {column} ASC NULLS FIRST, id ASC
            "#,
            column = resolution.last_attempt_column(),
        );
        let rows = sqlx::query_as::<_, MeterRow>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Meter::from).collect())
    }

    async fn mark_attempt(
        &self,
        meter_id: i64,
        resolution: Resolution,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE meters SET {column} = $1 WHERE id = $2",
            column = resolution.last_attempt_column(),
        );
        sqlx::query(&sql).bind(at).bind(meter_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn latest_recorded(
        &self,
        meter_id: i64,
        resolution: Resolution,
    ) -> Result<Option<OffsetDateTime>, StoreError> {
        let latest = sqlx::query_scalar::<_, OffsetDateTime>(
            r#"
            SELECT recorded_at
            FROM meter_data
            WHERE meter_id = $1
              AND resolution = $2
              AND value IS NOT NULL
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(meter_id)
        .bind(resolution.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn apply_sync(
        &self,
        meter_id: i64,
        resolution: Resolution,
        batch: &SyncBatch,
    ) -> Result<SyncOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let purged_stale = sqlx::query(
            "DELETE FROM meter_data WHERE meter_id = $1 AND resolution = $2 AND recorded_at < $3",
        )
        .bind(meter_id)
        .bind(resolution.as_str())
        .bind(batch.purge_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let purged_nulls = sqlx::query(
            r#"
            DELETE FROM meter_data
            WHERE meter_id = $1 AND resolution = $2 AND recorded_at >= $3 AND value IS NULL
            "#,
        )
        .bind(meter_id)
        .bind(resolution.as_str())
        .bind(batch.recheck_from)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut upserted = 0;
        for chunk in batch.points.chunks(UPSERT_CHUNK) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO meter_data (meter_id, resolution, recorded_at, value) ",
            );
            builder.push_values(chunk, |mut b, p| {
                b.push_bind(meter_id)
                    .push_bind(resolution.as_str())
                    .push_bind(p.recorded_at)
                    .push_bind(p.value);
            });
            builder.push(
                " ON CONFLICT (meter_id, resolution, recorded_at) DO UPDATE SET value = EXCLUDED.value",
            );
            upserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        Ok(SyncOutcome {
            purged_stale,
            purged_nulls,
            upserted,
        })
    }

    async fn update_current(
        &self,
        meter_id: i64,
        value: f64,
        recorded_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE meters SET current = $1, last_updated = $2 WHERE id = $3")
            .bind(value)
            .bind(recorded_at)
            .bind(meter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_units(&self, meter_id: i64, units: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE meters SET units = $1 WHERE id = $2")
            .bind(units)
            .bind(meter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn relative_value_rows(&self, meter_uuid: &str) -> Result<Vec<RelativeValueRow>, StoreError> {
        let rows = sqlx::query_as::<_, RelativeValueRow>(
            r#"
            SELECT id, meter_uuid, grouping, relative_value, permission
            FROM relative_values
            WHERE meter_uuid = $1
              AND grouping IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(meter_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn relative_value_targets(&self) -> Result<Vec<RelativeValueTarget>, StoreError> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT
                rv.id,
                rv.meter_uuid,
                rv.grouping,
                rv.relative_value,
                rv.permission,
                m.id AS meter_id,
                m.current
            FROM relative_values rv
            JOIN meters m ON m.bos_uuid = rv.meter_uuid
            WHERE rv.grouping IS NOT NULL
            ORDER BY rv.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RelativeValueTarget {
                row: RelativeValueRow {
                    id: r.id,
                    meter_uuid: r.meter_uuid,
                    grouping: r.grouping,
                    relative_value: r.relative_value,
                    permission: r.permission,
                },
                meter_id: r.meter_id,
                current: r.current,
            })
            .collect())
    }

    async fn cohort_values(&self, query: &CohortQuery) -> Result<Vec<f64>, StoreError> {
        let days: Vec<i32> = query.days.iter().map(|d| i32::from(*d)).collect();
        let limit = query
            .limit
            .map(i64::try_from)
            .transpose()
            .map_err(|e| StoreError::Invalid(format!("cohort limit out of range: {e}")))?;

        let values = sqlx::query_scalar::<_, f64>(COHORT_SQL)
        .bind(query.meter_id)
        .bind(query.resolution.as_str())
        .bind(query.until)
        .bind(query.since)
        .bind(query.zone.name())
        .bind(i32::from(query.hour_of_day))
        .bind(days)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    async fn store_relative_value(&self, row_id: i64, value: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE relative_values SET relative_value = $1 WHERE id = $2")
            .bind(value)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn readings(
        &self,
        meter_id: i64,
        resolution: Resolution,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>, StoreError> {
        let rows = sqlx::query_as::<_, ReadingPoint>(
            r#"
            SELECT recorded_at, value
            FROM meter_data
            WHERE meter_id = $1
              AND resolution = $2
              AND recorded_at > $3
              AND recorded_at < $4
            ORDER BY recorded_at
            "#,
        )
        .bind(meter_id)
        .bind(resolution.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::COHORT_SQL;

    #[test]
    fn cohort_sql_carries_every_matches_condition() {
        for clause in [
            "meter_id = $1",
            "resolution = $2",
            "value IS NOT NULL",
            "recorded_at < $3",
            "recorded_at > $4",
            "AT TIME ZONE $5",
            "EXTRACT(HOUR",
            "= $6",
            "EXTRACT(DOW",
            "+ 1) = ANY($7)",
            "ORDER BY recorded_at DESC",
            "LIMIT $8",
        ] {
            assert!(COHORT_SQL.contains(clause), "missing `{clause}`");
        }
    }
}
