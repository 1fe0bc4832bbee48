pub mod grouping;

use meter_store::domain::Meter;

use crate::{error::SyncError, sync::SyncContext};

pub use grouping::{parse_grouping, select_rule, GroupingError, GroupingRule, Sampling};

/// Percentile rank of `current` within `cohort` plus `current` itself.
///
/// Ties resolve to the lowest rank: the 1-based position of the first
/// element equal to `current` after sorting ascending.
pub fn relative_value(cohort: &[f64], current: f64) -> f64 {
    let mut values = Vec::with_capacity(cohort.len() + 1);
    values.extend_from_slice(cohort);
    values.push(current);
    values.sort_by(f64::total_cmp);

    let rank = values.partition_point(|v| v.total_cmp(&current).is_lt()) + 1;
    rank as f64 / values.len() as f64 * 100.0
}

/// Map a percentile onto `[min, max]`.
pub fn scale(pct: f64, min: f64, max: f64) -> f64 {
    pct / 100.0 * (max - min) + min
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub updated: usize,
    pub skipped: usize,
}

/// Recompute and persist one relative value. Returns `None` when no rule
/// covers today's day of week, leaving the stored value untouched.
pub async fn refresh(
    ctx: &SyncContext,
    meter_id: i64,
    rules: &[GroupingRule],
    row_id: i64,
    current: f64,
) -> Result<Option<i32>, SyncError> {
    let now = ctx.clock.now();
    let today = ctx.reporting_zone.local(now).weekday().number_from_sunday();

    let Some(rule) = select_rule(rules, today) else {
        return Ok(None);
    };

    let query = rule.cohort_query(meter_id, now, ctx.reporting_zone);
    let cohort = ctx.store.cohort_values(&query).await?;
    let value = relative_value(&cohort, current).round() as i32;

    ctx.store.store_relative_value(row_id, value).await?;
    ctx.events.relative_value_updated(row_id, meter_id, value);
    Ok(Some(value))
}

/// Refresh every row registered against `meter`. Rows whose grouping does
/// not parse are reported and skipped. Returns the number of rows written.
pub async fn refresh_for_meter(
    ctx: &SyncContext,
    meter: &Meter,
    current: f64,
) -> Result<usize, SyncError> {
    let rows = ctx.store.relative_value_rows(&meter.uuid).await?;
    let mut updated = 0;

    for row in rows {
        let Some(rules) = parsed_rules(ctx, row.id, row.grouping.as_deref()) else {
            continue;
        };
        if refresh(ctx, meter.id, &rules, row.id, current).await?.is_some() {
            updated += 1;
        }
    }

    Ok(updated)
}

/// Recompute every cached relative value from the meters' stored `current`.
pub async fn refresh_all(ctx: &SyncContext) -> Result<RefreshReport, SyncError> {
    let mut report = RefreshReport::default();

    for target in ctx.store.relative_value_targets().await? {
        let rules = parsed_rules(ctx, target.row.id, target.row.grouping.as_deref());
        let (Some(rules), Some(current)) = (rules, target.current) else {
            report.skipped += 1;
            continue;
        };

        match refresh(ctx, target.meter_id, &rules, target.row.id, current).await? {
            Some(_) => report.updated += 1,
            None => report.skipped += 1,
        }
    }

    Ok(report)
}

fn parsed_rules(ctx: &SyncContext, row_id: i64, grouping: Option<&str>) -> Option<Vec<GroupingRule>> {
    match parse_grouping(grouping?) {
        Ok(rules) if !rules.is_empty() => Some(rules),
        Ok(_) => None,
        Err(e) => {
            ctx.events.grouping_rejected(row_id, &e.to_string());
            None
        }
    }
}
