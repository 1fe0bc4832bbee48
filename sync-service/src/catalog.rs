use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{client::RemoteMeterClient, error::SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub name: String,
    pub url: String,
    #[serde(rename(deserialize = "displayName"))]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingSummary {
    pub id: String,
    pub name: String,
    pub meters: Vec<MeterSummary>,
}

#[derive(Deserialize)]
struct RawBuilding {
    id: Value,
    name: String,
    #[serde(default)]
    meters: Vec<MeterSummary>,
}

/// Every building reachable from `first_page_url`, following pagination.
/// Entries that do not have the expected shape are skipped.
pub async fn list_buildings(
    client: &RemoteMeterClient,
    first_page_url: &str,
) -> Result<Vec<BuildingSummary>, SyncError> {
    let items = client.fetch_all_pages(first_page_url).await?;
    Ok(items.into_iter().filter_map(building_summary).collect())
}

fn building_summary(item: Value) -> Option<BuildingSummary> {
    let raw: RawBuilding = match serde_json::from_value(item) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed building entry");
            return None;
        }
    };
    let id = match raw.id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(BuildingSummary {
        id,
        name: raw.name,
        meters: raw.meters,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::Query, routing::get, Json, Router};
    use meter_store::db::MemoryMeterStore;
    use serde_json::json;
    use std::collections::HashMap;
    use time::macros::datetime;

    use super::*;
    use crate::{clock::manual::ManualClock, test_support};

    #[tokio::test]
    async fn lists_buildings_across_pages_and_skips_malformed_entries() {
        let base = test_support::serve(|base| {
            let next = format!("{base}/buildings?page=2");
            Router::new().route(
                "/buildings",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let next = next.clone();
                    async move {
                        if q.get("page").map(String::as_str) == Some("2") {
                            Json(json!({
                                "data": [{ "id": "b-2", "name": "Library", "meters": [] }],
                                "links": { "next": "" }
                            }))
                        } else {
                            Json(json!({
                                "data": [
                                    {
                                        "id": 17,
                                        "name": "Science Center",
                                        "meters": [{
                                            "name": "sci_main_e",
                                            "url": "https://api.example.com/meters/sci_main_e",
                                            "displayName": "Main Electric"
                                        }]
                                    },
                                    { "name": "no id" }
                                ],
                                "links": { "next": next }
                            }))
                        }
                    }
                }),
            )
        })
        .await;

        let store = Arc::new(MemoryMeterStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-15 12:00:00 UTC)));
        let ctx = test_support::context(store, clock, test_support::utc());

        let buildings = list_buildings(&ctx.client, &format!("{base}/buildings")).await.unwrap();

        assert_eq!(buildings.len(), 2);
        assert_eq!(buildings[0].id, "17");
        assert_eq!(buildings[0].meters[0].display_name, "Main Electric");
        assert_eq!(buildings[1].name, "Library");

        let line = serde_json::to_value(&buildings[0].meters[0]).unwrap();
        assert_eq!(line["display_name"], "Main Electric");
    }
}
