use std::{
    env,
    io::{self, Write},
};

use anyhow::{bail, Result};
use sync_service::{config::AppConfig, observability, series, SyncContext};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Print stored readings of one meter as JSON lines on stdout.
///
/// The optional last argument is a tier name, or `daily` for hour-tier
/// averages per reporting-zone day. Without it the tier is picked from `from`.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: {} <meter_id> <from> <to> [resolution|daily]", args[0]);
    }
    let meter_id: i64 = args[1]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid meter id '{}': {e}", args[1]))?;
    let from = parse_instant(&args[2])?;
    let to = parse_instant(&args[3])?;

    let cfg = AppConfig::load()?;
    let ctx = SyncContext::connect(&cfg).await?;

    let points = match args.get(4).map(String::as_str) {
        Some("daily") => series::daily_series(&ctx, meter_id, from, to).await?,
        Some(tier) => series::load_series(&ctx, meter_id, from, to, Some(tier.parse()?)).await?,
        None => series::load_series(&ctx, meter_id, from, to, None).await?,
    };
    tracing::info!(meter_id, count = points.len(), "series exported");

    let mut out = io::stdout().lock();
    for point in &points {
        let line = serde_json::json!({
            "recorded_at": point.recorded_at.format(&Rfc3339)?,
            "value": point.value,
        });
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
    }

    Ok(())
}

fn parse_instant(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| anyhow::anyhow!("invalid RFC 3339 timestamp '{raw}': {e}"))
}
