#![cfg(feature = "live-upstream-tests")]

use metrics_rollup::{
    build_chain_overview, AdapterType, DayCutoff, HttpPayloadFetcher, MetadataSnapshot,
    OverviewQuery, OverviewRequest, PayloadFetcher, UpstreamConfig,
};

#[test]
fn live_dexs_overview_ranks_protocols() {
    let fetcher = HttpPayloadFetcher::new(UpstreamConfig {
        timeout_ms: 30_000,
        ..UpstreamConfig::default()
    })
    .expect("HTTP client should build");

    let payload = fetcher
        .fetch(&OverviewQuery::new(AdapterType::Dexs))
        .expect("live dexs overview should fetch");
    assert!(!payload.protocols.is_empty());
    assert!(!payload.total_data_chart.is_empty());

    let request = OverviewRequest::new(AdapterType::Dexs, DayCutoff::today(true));
    let overview = build_chain_overview(&payload, &request, &MetadataSnapshot::default());

    assert!(!overview.is_empty());
    assert!(overview.totals.total24h.is_some());
    assert_eq!(overview.protocols[0].rank, Some(1));
    assert!(!overview.all_chains.is_empty());
}
