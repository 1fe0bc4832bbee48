use time::{macros::time, Date, OffsetDateTime};

use super::ReportingZone;

/// A single stored or fetched sample. `value` is `None` when the remote API
/// reported no reading for the interval.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct ReadingPoint {
    pub recorded_at: OffsetDateTime,
    pub value: Option<f64>,
}

/// Collapse time-ordered readings into one point per local calendar day.
///
/// Each output point carries the mean of that day's non-null values and is
/// stamped at 11:00 local time. A day with only null readings yields a null
/// point.
pub fn daily_averages(points: &[ReadingPoint], zone: ReportingZone) -> Vec<ReadingPoint> {
    let mut out = Vec::new();
    let mut current: Option<(Date, f64, usize)> = None;

    for point in points {
        let day = zone.local(point.recorded_at).date();
        match current.as_mut() {
            Some((d, sum, count)) if *d == day => {
                if let Some(v) = point.value {
                    *sum += v;
                    *count += 1;
                }
            }
            _ => {
                if let Some(done) = current.take() {
                    out.push(day_point(done, zone));
                }
                current = Some(match point.value {
                    Some(v) => (day, v, 1),
                    None => (day, 0.0, 0),
                });
            }
        }
    }

    if let Some(done) = current {
        out.push(day_point(done, zone));
    }
    out
}

fn day_point((day, sum, count): (Date, f64, usize), zone: ReportingZone) -> ReadingPoint {
    ReadingPoint {
        recorded_at: zone.assume_local(day.with_time(time!(11:00))),
        value: (count > 0).then(|| sum / count as f64),
    }
}
