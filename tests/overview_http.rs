use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use metrics_rollup::{
    overview_router, AdapterType, InMemoryPayloadFetcher, MetadataSnapshot, OverviewPayload,
    OverviewQuery, OverviewSettings, SECONDS_PER_DAY,
};
use regex::Regex;
use serde_json::{json, Value};
use tower::util::ServiceExt;

const DAY: i64 = SECONDS_PER_DAY;
const AS_OF: i64 = 19_000;

fn payload() -> OverviewPayload {
    serde_json::from_value(json!({
        "totalDataChart": [[(AS_OF - 1) * DAY, 90], [AS_OF * DAY, 120]],
        "totalDataChartBreakdown": [[AS_OF * DAY, {"Uniswap V3": 100, "Curve": 20}]],
        "protocols": [
            {
                "id": "uni-v3", "name": "Uniswap V3", "parentProtocol": "parent#uniswap",
                "chains": ["Ethereum", "Arbitrum"], "linkedProtocols": ["uni-v2"],
                "totalDataChart": [
                    [(AS_OF - 1) * DAY, {"Ethereum": {"v3": 50}, "Arbitrum": {"v3": 20}}],
                    [AS_OF * DAY, {"Ethereum": {"v3": 70}, "Arbitrum": {"v3": 30}}]
                ]
            },
            {
                "id": "curve", "name": "Curve", "chains": ["Ethereum"],
                "totalDataChart": [
                    [(AS_OF - 1) * DAY, {"Ethereum": 20}],
                    [AS_OF * DAY, {"Ethereum": 20}]
                ]
            },
            {
                "id": "dormant", "name": "Dormant", "chains": ["Ethereum"],
                "totalDataChart": [[(AS_OF - 400) * DAY, {"Ethereum": 5}]]
            }
        ]
    }))
    .expect("fixture payload should decode")
}

fn app() -> Router {
    let fetcher = InMemoryPayloadFetcher::new();
    fetcher.insert(&OverviewQuery::new(AdapterType::Dexs), payload());

    let mut metadata = MetadataSnapshot::default();
    metadata.insert_chain("Ethereum", [AdapterType::Dexs].into());
    metadata.insert_chain("Arbitrum", [AdapterType::Fees].into());

    overview_router(
        Arc::new(fetcher),
        Arc::new(metadata),
        OverviewSettings::default(),
    )
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

#[tokio::test]
async fn overview_returns_ranked_protocols_with_etag() {
    let uri = format!("/overview/dexs?asOfDay={AS_OF}&excludeIncompleteDay=false");
    let (status, headers, body) = get(app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    let etag = headers
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .expect("etag header should be present");
    assert!(Regex::new(r#"^"[0-9a-f]{64}"$"#).unwrap().is_match(etag));

    assert_eq!(body["chain"], "All");
    assert_eq!(body["total24h"], 120.0);
    assert!((body["change_1d"].as_f64().unwrap() - 100.0 / 3.0).abs() < 1e-9);

    let protocols = body["protocols"].as_array().unwrap();
    let ids: Vec<&str> = protocols.iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["parent#uniswap", "curve", "dormant"]);
    assert_eq!(protocols[0]["rank"], 1);
    assert_eq!(protocols[0]["total24h"], 100.0);
    assert_eq!(protocols[0]["subRows"][0]["id"], "uni-v3");
    assert!(protocols[2]["total24h"].is_null());
    assert_eq!(body["allChains"], json!(["Arbitrum", "Ethereum"]));
    assert_eq!(body["chainBreakdown"][0]["name"], "Ethereum");
    assert_eq!(body["totalDataChartBreakdown"][0]["values"]["Curve"], 20.0);
}

#[tokio::test]
async fn chain_overview_drops_other_chain_contributions() {
    let uri = format!("/overview/dexs/ethereum?asOfDay={AS_OF}&excludeIncompleteDay=false");
    let (status, _, body) = get(app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chainDisplayName"], "Ethereum");
    let protocols = body["protocols"].as_array().unwrap();
    assert_eq!(protocols.len(), 2);
    assert_eq!(protocols[0]["id"], "parent#uniswap");
    assert_eq!(protocols[0]["total24h"], 70.0);
    assert_eq!(protocols[1]["id"], "curve");
}

#[tokio::test]
async fn excluding_incomplete_day_moves_window_back() {
    let uri = format!("/overview/dexs?asOfDay={AS_OF}&excludeIncompleteDay=true");
    let (status, _, body) = get(app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total24h"], 90.0);
    assert_eq!(body["protocols"][0]["total24h"], 70.0);
}

#[tokio::test]
async fn sort_by_metric_reorders_rows() {
    let uri =
        format!("/overview/dexs?asOfDay={AS_OF}&excludeIncompleteDay=false&sortBy=change_1d");
    let (status, _, body) = get(app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["protocols"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["parent#uniswap", "curve", "dormant"]);
    assert_eq!(body["protocols"][1]["change_1d"], 0.0);
}

#[tokio::test]
async fn unknown_metric_is_bad_request() {
    let (status, _, body) = get(app(), "/overview/dexs?sortBy=tvl").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown sort metric: tvl");
}

#[tokio::test]
async fn unknown_adapter_type_is_not_found() {
    let (status, _, body) = get(app(), "/overview/lending").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown adapter type: lending");
}

#[tokio::test]
async fn ineligible_chain_or_missing_payload_is_not_found() {
    let (status, _, _) = get(app(), &format!("/overview/dexs/arbitrum?asOfDay={AS_OF}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = get(app(), "/overview/fees").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("no protocols"));
}

#[tokio::test]
async fn matching_if_none_match_is_not_modified() {
    let uri = format!("/overview/dexs?asOfDay={AS_OF}");
    let (_, headers, _) = get(app(), &uri).await;
    let etag = headers.get(header::ETAG).unwrap().clone();

    let response = app()
        .oneshot(
            Request::builder()
                .uri(&uri)
                .header(header::IF_NONE_MATCH, etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}
