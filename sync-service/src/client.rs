use std::{sync::Arc, time::Duration};

use meter_store::domain::{ReadingPoint, ReportingZone, Resolution};
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};

use crate::{clock::Clock, credentials::CredentialStore, error::SyncError, events::SyncEvents};

/// Upper bound on a server-requested rate-limit pause.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Readings returned for one (meter, tier, window) request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterWindow {
    pub points: Vec<ReadingPoint>,
    pub units: Option<String>,
}

#[derive(Deserialize)]
struct MeterDataPayload {
    data: Option<Vec<RawPoint>>,
    meta: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawPoint {
    localtime: String,
    value: Option<f64>,
}

#[derive(Deserialize)]
struct CatalogPage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    links: Option<CatalogLinks>,
}

#[derive(Deserialize)]
struct CatalogLinks {
    next: Option<String>,
}

enum Attempt {
    Body(String),
    RateLimited { retry_after: Duration },
}

/// Authenticated access to the building-management API.
pub struct RemoteMeterClient {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    credentials_id: i64,
    events: Arc<dyn SyncEvents>,
    clock: Arc<dyn Clock>,
    reporting_zone: ReportingZone,
}

impl RemoteMeterClient {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialStore>,
        credentials_id: i64,
        events: Arc<dyn SyncEvents>,
        clock: Arc<dyn Clock>,
        reporting_zone: ReportingZone,
    ) -> Self {
        Self {
            http,
            credentials,
            credentials_id,
            events,
            clock,
            reporting_zone,
        }
    }

    /// GET `url` with the current bearer token.
    ///
    /// A 429 response is retried exactly once after sleeping `Retry-After`
    /// (capped at five minutes) plus one second; any failure after that is a
    /// transport error.
    pub async fn fetch_page(&self, url: &str) -> Result<String, SyncError> {
        self.get(url, &[]).await
    }

    /// Readings for `start <= t < end`. Malformed payloads yield an empty window.
    pub async fn fetch_meter_window(
        &self,
        meter_data_url: &str,
        resolution: Resolution,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindow, SyncError> {
        let query = [
            ("resolution", resolution.as_str().to_string()),
            ("start", self.format_timestamp(start)?),
            ("end", self.format_timestamp(end)?),
        ];
        let body = self.get(meter_data_url, &query).await?;
        parse_meter_payload(&body, self.reporting_zone).map(|window| {
            window.unwrap_or_else(|e| {
                self.events.payload_malformed(meter_data_url, &e);
                MeterWindow::default()
            })
        })
    }

    /// Follow `links.next` from `first_url`, concatenating every page's `data`.
    pub async fn fetch_all_pages(&self, first_url: &str) -> Result<Vec<serde_json::Value>, SyncError> {
        let mut items = Vec::new();
        let mut url = first_url.to_string();

        loop {
            let body = self.fetch_page(&url).await?;
            let page: CatalogPage = match serde_json::from_str(&body) {
                Ok(page) => page,
                Err(e) => {
                    self.events.payload_malformed(&url, &e.to_string());
                    break;
                }
            };
            items.extend(page.data);

            match page.links.and_then(|l| l.next) {
                Some(next) if !next.is_empty() && next != url => url = next,
                _ => break,
            }
        }

        Ok(items)
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, SyncError> {
        match self.send(url, query).await? {
            Attempt::Body(body) => Ok(body),
            Attempt::RateLimited { retry_after } => {
                let sleep = retry_after + Duration::from_secs(1);
                self.events.rate_limited(url, sleep);
                tokio::time::sleep(sleep).await;

                match self.send(url, query).await? {
                    Attempt::Body(body) => Ok(body),
                    Attempt::RateLimited { .. } => Err(SyncError::Transport(format!(
                        "GET {url}: still rate limited after retry"
                    ))),
                }
            }
        }
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<Attempt, SyncError> {
        let token = self.credentials.valid_token(self.credentials_id).await?;

        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("GET {url}: {e}")))?;
        self.events.url_fetched(response.url().as_str());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|raw| retry_after(raw, self.clock.now()))
                .unwrap_or(Duration::ZERO);
            return Ok(Attempt::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!("GET {url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map(Attempt::Body)
            .map_err(|e| SyncError::Transport(format!("GET {url}: failed to read body: {e}")))
    }

    fn format_timestamp(&self, at: OffsetDateTime) -> Result<String, SyncError> {
        let whole_seconds = at - time::Duration::nanoseconds(i64::from(at.nanosecond()));
        self.reporting_zone
            .local(whole_seconds)
            .format(&Rfc3339)
            .map_err(|e| SyncError::Precondition(format!("cannot format timestamp {at}: {e}")))
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date relative to `now`.
/// Unreadable values and dates in the past count as zero.
fn retry_after(raw: &str, now: OffsetDateTime) -> Duration {
    let raw = raw.trim();
    let secs = if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse().unwrap_or(u64::MAX)
    } else {
        let http_date = format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        );
        PrimitiveDateTime::parse(raw, &http_date)
            .map(|at| (at.assume_utc() - now).whole_seconds())
            .ok()
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(0)
    };
    Duration::from_secs(secs).min(MAX_RETRY_AFTER)
}

/// Outer `Err` is a precondition violation (unparsable timestamp); inner
/// `Err` describes a malformed payload, which callers treat as empty.
fn parse_meter_payload(
    body: &str,
    zone: ReportingZone,
) -> Result<Result<MeterWindow, String>, SyncError> {
    let payload: MeterDataPayload = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => return Ok(Err(e.to_string())),
    };

    let units = payload
        .meta
        .as_ref()
        .and_then(|m| m.pointer("/units/value/displayName"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let points = payload
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|raw| {
            Ok(ReadingPoint {
                recorded_at: parse_localtime(&raw.localtime, zone)?,
                value: raw.value,
            })
        })
        .collect::<Result<Vec<_>, SyncError>>()?;

    Ok(Ok(MeterWindow { points, units }))
}

/// RFC 3339, or an offset-less ISO 8601 local time taken in `zone`.
fn parse_localtime(raw: &str, zone: ReportingZone) -> Result<OffsetDateTime, SyncError> {
    let raw = raw.trim();
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(at);
    }
    let local = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, &local)
        .map(|at| zone.assume_local(at))
        .map_err(|e| SyncError::Precondition(format!("unparsable timestamp '{raw}': {e}")))
}
