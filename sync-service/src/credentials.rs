use std::{collections::HashMap, sync::Arc};

use meter_store::{domain::ApiCredentials, MeterDataStore};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::{clock::Clock, error::SyncError, events::SyncEvents};

/// Token lifetime as documented by the remote API, and how early to renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub lifetime: Duration,
    pub safety_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::hours(1),
            safety_margin: Duration::seconds(5),
        }
    }
}

impl TokenPolicy {
    fn is_fresh(&self, issued_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        now - issued_at < self.lifetime - self.safety_margin
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    issued_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Hands out bearer tokens, renewing them with a password grant once they
/// are about to expire. Renewed tokens are persisted to the `api` table.
pub struct CredentialStore {
    http: reqwest::Client,
    auth_url: String,
    store: Arc<dyn MeterDataStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SyncEvents>,
    policy: TokenPolicy,
    cache: Mutex<HashMap<i64, CachedToken>>,
}

impl CredentialStore {
    pub fn new(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        store: Arc<dyn MeterDataStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn SyncEvents>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
            store,
            clock,
            events,
            policy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn valid_token(&self, credentials_id: i64) -> Result<String, SyncError> {
        let now = self.clock.now();
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(&credentials_id) {
            if self.policy.is_fresh(cached.issued_at, now) {
                return Ok(cached.token.clone());
            }
        }

        let credentials = self
            .store
            .api_credentials(credentials_id)
            .await?
            .ok_or_else(|| SyncError::Credential(format!("no api credentials with id {credentials_id}")))?;

        if let (Some(token), Some(issued_at)) = (&credentials.token, credentials.token_updated) {
            if self.policy.is_fresh(issued_at, now) {
                cache.insert(
                    credentials_id,
                    CachedToken {
                        token: token.clone(),
                        issued_at,
                    },
                );
                return Ok(token.clone());
            }
        }

        let token = self.exchange(&credentials).await?;
        self.store.save_api_token(credentials_id, &token, now).await?;
        self.events.token_renewed(credentials_id);
        cache.insert(
            credentials_id,
            CachedToken {
                token: token.clone(),
                issued_at: now,
            },
        );
        Ok(token)
    }

    async fn exchange(&self, credentials: &ApiCredentials) -> Result<String, SyncError> {
        let form = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("grant_type", "password"),
        ];

        let response = self
            .http
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Credential(format!("token endpoint returned HTTP {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Credential(format!("invalid token response: {e}")))?;
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
    use meter_store::db::MemoryMeterStore;
    use time::macros::datetime;

    use super::*;
    use crate::{clock::manual::ManualClock, events::NoopEvents, test_support};

    fn credential_store(store: Arc<MemoryMeterStore>, clock: Arc<ManualClock>, auth_url: String) -> CredentialStore {
        CredentialStore::new(
            reqwest::Client::new(),
            auth_url,
            store,
            clock,
            Arc::new(NoopEvents),
            TokenPolicy::default(),
        )
    }

    #[tokio::test]
    async fn fresh_persisted_token_is_returned_without_network() {
        let now = datetime!(2024-05-15 12:00:00 UTC);
        let store = Arc::new(MemoryMeterStore::new());
        store.insert_credentials(test_support::credentials(1, Some("cached"), Some(now - Duration::minutes(30))));
        let clock = Arc::new(ManualClock::new(now));

        // Nothing listens here; any request would fail.
        let creds = credential_store(store, clock, "http://127.0.0.1:9/o/token/".to_string());

        assert_eq!(creds.valid_token(1).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn expiring_token_is_renewed_and_persisted() {
        let now = datetime!(2024-05-15 12:00:00 UTC);
        let store = Arc::new(MemoryMeterStore::new());
        // 3596 s old: inside the safety margin of the one hour lifetime.
        store.insert_credentials(test_support::credentials(1, Some("old"), Some(now - Duration::seconds(3596))));
        let clock = Arc::new(ManualClock::new(now));

        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/o/token/",
                post(
                    |State(calls): State<Arc<AtomicUsize>>, Form(form): Form<HashMap<String, String>>| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(form.get("grant_type").map(String::as_str), Some("password"));
                        assert_eq!(form.get("username").map(String::as_str), Some("dashboard"));
                        Json(serde_json::json!({ "access_token": "renewed" }))
                    },
                ),
            )
            .with_state(calls.clone());
        let base = test_support::serve(|_| router).await;

        let creds = credential_store(store.clone(), clock, format!("{base}/o/token/"));

        assert_eq!(creds.valid_token(1).await.unwrap(), "renewed");
        // Second call is served from the in-memory cache.
        assert_eq!(creds.valid_token(1).await.unwrap(), "renewed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let persisted = store.credentials(1).unwrap();
        assert_eq!(persisted.token.as_deref(), Some("renewed"));
        assert_eq!(persisted.token_updated, Some(now));
    }

    #[tokio::test]
    async fn failed_exchange_is_a_fatal_credential_error() {
        let now = datetime!(2024-05-15 12:00:00 UTC);
        let store = Arc::new(MemoryMeterStore::new());
        store.insert_credentials(test_support::credentials(1, None, None));
        let clock = Arc::new(ManualClock::new(now));

        let router = Router::new().route("/o/token/", post(|| async { StatusCode::UNAUTHORIZED }));
        let base = test_support::serve(|_| router).await;

        let creds = credential_store(store, clock, format!("{base}/o/token/"));
        let err = creds.valid_token(1).await.unwrap_err();

        assert!(matches!(err, SyncError::Credential(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unknown_credentials_id_is_a_credential_error() {
        let store = Arc::new(MemoryMeterStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-15 12:00:00 UTC)));
        let creds = credential_store(store, clock, "http://127.0.0.1:9/o/token/".to_string());

        assert!(matches!(creds.valid_token(7).await, Err(SyncError::Credential(_))));
    }
}
