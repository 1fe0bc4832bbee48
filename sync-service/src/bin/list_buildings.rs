use std::io::{self, Write};

use anyhow::Result;
use sync_service::{catalog, config::AppConfig, observability, SyncContext};

/// Print one JSON object per building to stdout.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let ctx = SyncContext::connect(&cfg).await?;

    let buildings = catalog::list_buildings(&ctx.client, &cfg.api.buildings_url).await?;
    tracing::info!(count = buildings.len(), "buildings listed");

    let mut out = io::stdout().lock();
    for building in &buildings {
        serde_json::to_writer(&mut out, building)?;
        writeln!(out)?;
    }

    Ok(())
}
