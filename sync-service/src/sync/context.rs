use std::{sync::Arc, time::Duration};

use meter_store::{db::PgMeterStore, domain::ReportingZone, MeterDataStore};
use sqlx::postgres::PgPoolOptions;

use crate::{
    client::RemoteMeterClient,
    clock::{Clock, SystemClock},
    config::AppConfig,
    credentials::{CredentialStore, TokenPolicy},
    events::{SyncEvents, TracingEvents},
};

/// Everything one sync or refresh needs, passed explicitly.
pub struct SyncContext {
    pub store: Arc<dyn MeterDataStore>,
    pub client: RemoteMeterClient,
    pub events: Arc<dyn SyncEvents>,
    pub clock: Arc<dyn Clock>,
    /// Zone used for hour-of-day, day-of-week and calendar-day decisions.
    pub reporting_zone: ReportingZone,
}

impl SyncContext {
    /// Production wiring: Postgres store, system clock, tracing events.
    pub async fn connect(cfg: &AppConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.database.max_connections)
            .connect(&cfg.database.uri)
            .await?;
        let store: Arc<dyn MeterDataStore> = Arc::new(PgMeterStore::new(pool));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events: Arc<dyn SyncEvents> = Arc::new(TracingEvents);
        let reporting_zone = cfg.scheduler.reporting_zone()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.api.request_timeout_secs))
            .build()?;

        let policy = TokenPolicy {
            lifetime: time::Duration::seconds(i64::try_from(cfg.api.token_lifetime_secs)?),
            safety_margin: time::Duration::seconds(i64::try_from(cfg.api.token_safety_margin_secs)?),
        };
        let credentials = Arc::new(CredentialStore::new(
            http.clone(),
            cfg.api.auth_url.clone(),
            store.clone(),
            clock.clone(),
            events.clone(),
            policy,
        ));
        let client = RemoteMeterClient::new(
            http,
            credentials,
            cfg.api.credentials_id,
            events.clone(),
            clock.clone(),
            reporting_zone,
        );

        Ok(Self {
            store,
            client,
            events,
            clock,
            reporting_zone,
        })
    }
}
