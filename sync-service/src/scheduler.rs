use std::time::Duration;

use meter_store::domain::Resolution;

use crate::{
    error::SyncError,
    sync::{sync_meter, SyncContext},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Walks the in-use meters of each tier, stalest first, one at a time.
pub struct SyncScheduler {
    tiers: Vec<Resolution>,
}

impl SyncScheduler {
    pub fn new(tiers: Vec<Resolution>) -> Self {
        Self { tiers }
    }

    /// Sync every due meter of one tier. Recoverable failures are reported
    /// and skipped; a fatal one ends the pass.
    pub async fn run_tier(&self, ctx: &SyncContext, resolution: Resolution) -> Result<PassReport, SyncError> {
        let mut report = PassReport::default();

        for meter in ctx.store.meters_due(resolution).await? {
            report.attempted += 1;
            match sync_meter(ctx, &meter, resolution).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    ctx.events.sync_failed(meter.id, resolution, &e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn run_pass(&self, ctx: &SyncContext) -> Result<PassReport, SyncError> {
        let mut report = PassReport::default();
        for &resolution in &self.tiers {
            let tier = self.run_tier(ctx, resolution).await?;
            tracing::info!(
                %resolution,
                attempted = tier.attempted,
                succeeded = tier.succeeded,
                failed = tier.failed,
                "tier pass finished"
            );
            report.absorb(tier);
        }
        Ok(report)
    }

    /// Repeat passes with `interval` between them until a fatal error.
    pub async fn run_forever(&self, ctx: &SyncContext, interval: Duration) -> Result<(), SyncError> {
        loop {
            self.run_pass(ctx).await?;
            tokio::time::sleep(interval).await;
        }
    }
}
