use std::env;

use anyhow::{bail, Result};
use meter_store::domain::Resolution;
use sync_service::{config::AppConfig, observability, sync::sync_meter, SyncContext};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <meter_id> <resolution>", args[0]);
    }
    let meter_id: i64 = args[1]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid meter id '{}': {e}", args[1]))?;
    let resolution: Resolution = args[2].parse()?;

    let cfg = AppConfig::load()?;
    let ctx = SyncContext::connect(&cfg).await?;

    let Some(meter) = ctx.store.meter(meter_id).await? else {
        bail!("meter {meter_id} not found");
    };

    let report = sync_meter(&ctx, &meter, resolution).await?;
    tracing::info!(
        meter_id,
        %resolution,
        window_start = %report.window_start,
        full_backfill = report.full_backfill,
        fetched = report.fetched,
        upserted = report.outcome.upserted,
        purged_stale = report.outcome.purged_stale,
        purged_nulls = report.outcome.purged_nulls,
        "meter synced"
    );

    Ok(())
}
