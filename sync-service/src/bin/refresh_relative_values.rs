use anyhow::Result;
use sync_service::{config::AppConfig, observability, relative, SyncContext};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let ctx = SyncContext::connect(&cfg).await?;

    let report = relative::refresh_all(&ctx).await?;
    tracing::info!(
        updated = report.updated,
        skipped = report.skipped,
        "relative values refreshed"
    );

    Ok(())
}
