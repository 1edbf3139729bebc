use std::fs;

use metrics_rollup::{
    build_chain_overview, fetch_or_empty, AdapterType, DayCutoff, FilePayloadFetcher,
    MetadataSnapshot, OverviewQuery, OverviewRequest, PayloadFetcher, UpstreamError,
    SECONDS_PER_DAY,
};
use serde_json::json;
use tempfile::tempdir;

const DAY: i64 = SECONDS_PER_DAY;

fn write_payload(dir: &std::path::Path, stem: &str, payload: serde_json::Value) {
    fs::write(dir.join(format!("{stem}.json")), payload.to_string())
        .expect("fixture payload should be written");
}

#[test]
fn file_fetcher_prefers_chain_file_over_adapter_file() {
    let dir = tempdir().unwrap();
    write_payload(
        dir.path(),
        "fees",
        json!({"protocols": [{"name": "All Chains"}]}),
    );
    write_payload(
        dir.path(),
        "fees-bnb-chain",
        json!({"protocols": [{"name": "Chain Only"}]}),
    );
    let fetcher = FilePayloadFetcher::new(dir.path());

    let chain_query = OverviewQuery {
        chain: Some("BNB Chain".to_string()),
        ..OverviewQuery::new(AdapterType::Fees)
    };
    assert_eq!(fetcher.fetch(&chain_query).unwrap().protocols[0].name, "Chain Only");

    let other_chain = OverviewQuery {
        chain: Some("base".to_string()),
        ..OverviewQuery::new(AdapterType::Fees)
    };
    assert_eq!(fetcher.fetch(&other_chain).unwrap().protocols[0].name, "All Chains");
}

#[test]
fn file_fetcher_reports_missing_and_malformed_payloads() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("dexs.json"), "{not json").unwrap();
    let fetcher = FilePayloadFetcher::new(dir.path());

    assert!(matches!(
        fetcher.fetch(&OverviewQuery::new(AdapterType::Options)),
        Err(UpstreamError::Missing(stem)) if stem == "options"
    ));
    assert!(matches!(
        fetcher.fetch(&OverviewQuery::new(AdapterType::Dexs)),
        Err(UpstreamError::Decode(_))
    ));
    assert!(fetch_or_empty(&fetcher, &OverviewQuery::new(AdapterType::Dexs)).is_empty());
}

#[test]
fn file_payload_flows_through_overview() {
    let dir = tempdir().unwrap();
    write_payload(
        dir.path(),
        "derivatives",
        json!({
            "totalDataChart": [[19_000 * DAY * 1_000, "250"], [19_001 * DAY * 1_000, 500]],
            "protocols": [
                {
                    "defillamaId": 7, "name": "Perp A", "category": "Derivatives",
                    "chains": ["Ethereum"],
                    "totalDataChart": [[19_000 * DAY, 100], [19_001 * DAY, 200]]
                },
                {
                    "defillamaId": "8", "name": "Perp B", "category": "Derivatives",
                    "chains": null,
                    "totalDataChart": [
                        [19_000 * DAY, 150],
                        [19_001 * DAY, "300"],
                        [19_001 * DAY + 30, null]
                    ]
                }
            ]
        }),
    );

    let fetcher = FilePayloadFetcher::new(dir.path());
    let request = OverviewRequest::new(AdapterType::Derivatives, DayCutoff::at(19_001));
    let payload = fetch_or_empty(&fetcher, &request.query());
    let overview = build_chain_overview(&payload, &request, &MetadataSnapshot::default());

    assert_eq!(overview.totals.total24h, Some(500.0));
    assert_eq!(overview.totals.total48hto24h, Some(250.0));
    assert_eq!(overview.changes.change_1d, Some(100.0));

    let ids: Vec<&str> = overview.protocols.iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec!["8", "7"]);
    assert_eq!(overview.protocols[0].totals.total24h, Some(300.0));
    assert_eq!(overview.protocols[0].totals.total_all_time, Some(450.0));
    let dominance = overview.dominance.expect("dominance should exist");
    assert_eq!(dominance.name, "Perp B");
    assert_eq!(dominance.share_pct, 60.0);
}
