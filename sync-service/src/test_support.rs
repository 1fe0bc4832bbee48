use std::sync::Arc;

use axum::Router;
use meter_store::{
    db::MemoryMeterStore,
    domain::{ApiCredentials, Meter, ReportingZone, TierMarkers},
};
use time::OffsetDateTime;

use crate::{
    client::RemoteMeterClient,
    clock::manual::ManualClock,
    credentials::{CredentialStore, TokenPolicy},
    events::NoopEvents,
    sync::SyncContext,
};

/// Bind a fake remote API on an ephemeral port. `build` receives the base URL
/// so handlers can emit absolute links back to the same server.
pub(crate) async fn serve(build: impl FnOnce(&str) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    base
}

pub(crate) fn credentials(
    id: i64,
    token: Option<&str>,
    token_updated: Option<OffsetDateTime>,
) -> ApiCredentials {
    ApiCredentials {
        id,
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "dashboard".to_string(),
        password: "hunter2".to_string(),
        token: token.map(str::to_string),
        token_updated,
    }
}

pub(crate) fn zone(name: &str) -> ReportingZone {
    ReportingZone::from_name(name).unwrap()
}

pub(crate) fn utc() -> ReportingZone {
    zone("Etc/UTC")
}

pub(crate) fn meter(id: i64, url: String) -> Meter {
    Meter {
        id,
        uuid: format!("uuid-{id}"),
        url,
        units: None,
        current: None,
        last_updated: None,
        in_use: true,
        last_attempts: TierMarkers::default(),
    }
}

/// Context over an in-memory store whose credentials row 1 holds a fresh
/// token "test-token", so no auth exchange happens.
pub(crate) fn context(
    store: Arc<MemoryMeterStore>,
    clock: Arc<ManualClock>,
    reporting_zone: ReportingZone,
) -> SyncContext {
    use crate::clock::Clock;

    store.insert_credentials(credentials(1, Some("test-token"), Some(clock.now())));

    let events = Arc::new(NoopEvents);
    let http = reqwest::Client::new();
    let creds = Arc::new(CredentialStore::new(
        http.clone(),
        "http://127.0.0.1:9/o/token/",
        store.clone(),
        clock.clone(),
        events.clone(),
        TokenPolicy::default(),
    ));
    let client = RemoteMeterClient::new(
        http,
        creds,
        1,
        events.clone(),
        clock.clone(),
        reporting_zone,
    );

    SyncContext {
        store,
        client,
        events,
        clock,
        reporting_zone,
    }
}
