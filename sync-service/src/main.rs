use std::time::Duration;

use anyhow::Result;
use sync_service::{
    config::AppConfig, metrics_server, observability, scheduler::SyncScheduler, SyncContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let ctx = SyncContext::connect(&cfg).await?;
    let scheduler = SyncScheduler::new(cfg.scheduler.tiers.clone());

    match cfg.scheduler.interval_secs {
        Some(secs) => {
            tracing::info!(interval_secs = secs, "starting periodic sync");
            scheduler
                .run_forever(&ctx, Duration::from_secs(secs))
                .await?;
        }
        None => {
            let report = scheduler.run_pass(&ctx).await?;
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                "sync pass finished"
            );
        }
    }

    Ok(())
}
