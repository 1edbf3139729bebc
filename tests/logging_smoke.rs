use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use metrics_rollup::{
    build_chain_overview, fetch_or_empty, log_app_bind, log_app_start, log_app_stop,
    log_metadata_source, log_payload_source, normalize_samples, overview_router, refresh_once,
    AdapterType, DayCutoff, InMemoryPayloadFetcher, LoggingConfig, MetadataCache, MetadataError,
    MetadataFetcher, MetadataLookup, MetadataSnapshot, OverviewPayload, OverviewQuery,
    OverviewRequest, OverviewSettings, RawSample, RollupConfig,
};
use serde_json::Value;
use tower::util::ServiceExt;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

/// JSON log lines written by the subscriber under test.
#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl LogSink {
    fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_events(max_level: Level, f: impl FnOnce()) -> Vec<Value> {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(max_level)
        .with_writer(sink.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, f);
    sink.events()
}

fn event<'a>(events: &'a [Value], name: &str) -> &'a Value {
    events
        .iter()
        .find(|line| line["fields"]["event"] == name)
        .unwrap_or_else(|| panic!("no {name} event in {events:?}"))
}

struct BrokenMetadata;

impl MetadataFetcher for BrokenMetadata {
    fn fetch_snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        Err(MetadataError::Fetch {
            url: "http://metadata.invalid/chains.json".to_string(),
            message: "simulated outage".to_string(),
        })
    }
}

struct OneChain;

impl MetadataFetcher for OneChain {
    fn fetch_snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        let mut snapshot = MetadataSnapshot::default();
        snapshot.insert_chain("Ethereum", [AdapterType::Fees].into());
        Ok(snapshot)
    }
}

#[test]
fn overview_build_reports_request_shape() {
    let events = capture_events(Level::INFO, || {
        let request = OverviewRequest::new(AdapterType::Fees, DayCutoff::at(2));
        let overview = build_chain_overview(
            &OverviewPayload::default(),
            &request,
            &MetadataSnapshot::default(),
        );
        assert!(overview.is_empty());
    });

    let finish = &event(&events, "overview.build.finish")["fields"];
    assert_eq!(finish["component"], "overview");
    assert_eq!(finish["adapter_type"], "fees");
    assert_eq!(finish["as_of_day"], 2);
    assert_eq!(finish["protocols"], 0);
}

#[test]
fn failed_fetch_is_a_warning_naming_the_payload() {
    let events = capture_events(Level::INFO, || {
        let fetcher = InMemoryPayloadFetcher::new();
        let payload = fetch_or_empty(&fetcher, &OverviewQuery::new(AdapterType::Options));
        assert!(payload.is_empty());
    });

    let failed = event(&events, "upstream.fetch.failed");
    assert_eq!(failed["level"], "WARN");
    assert!(failed["fields"]["error"]
        .as_str()
        .is_some_and(|error| error.contains("no payload available for options")));
}

#[test]
fn dropped_incomplete_day_is_debug_only() {
    let drop_today = || {
        let series = normalize_samples(&[RawSample::scalar(5 * 86_400, 1.0)], Some(5));
        assert!(series.is_empty());
    };

    let events = capture_events(Level::DEBUG, drop_today);
    assert_eq!(event(&events, "normalize.incomplete_day_dropped")["fields"]["day"], 5);
    assert!(capture_events(Level::INFO, drop_today).is_empty());
}

#[test]
fn metadata_refresh_reports_added_chains_and_failures() {
    let events = capture_events(Level::INFO, || {
        let cache = MetadataCache::default();
        refresh_once(&cache, &OneChain).expect("refresh should apply");
        assert!(refresh_once(&cache, &BrokenMetadata).is_err());
        assert!(cache.lookup_chain("ethereum").is_some());
    });

    let applied = &event(&events, "metadata.refresh.applied")["fields"];
    assert_eq!(applied["added_chains"], 1);
    assert_eq!(applied["chains"], 1);
}

#[test]
fn server_lifecycle_events_carry_their_settings() {
    let events = capture_events(Level::INFO, || {
        log_app_start(&LoggingConfig::default(), &RollupConfig::default());
        log_payload_source("file", "/srv/payloads");
        log_metadata_source("http", Some("http://meta.local"), Some(3_600_000));
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));
        log_app_stop("ctrl_c");
    });

    let start = &event(&events, "app.start")["fields"];
    assert_eq!(start["log_format"], "pretty");
    assert_eq!(start["top_chains"], 10);
    assert_eq!(event(&events, "payload_source.selected")["fields"]["source"], "file");
    assert_eq!(
        event(&events, "metadata_source.selected")["fields"]["refresh_interval_ms"],
        3_600_000
    );
    assert_eq!(event(&events, "app.bind")["fields"]["bind_addr"], "127.0.0.1:8080");
    assert_eq!(event(&events, "app.stop")["fields"]["reason"], "ctrl_c");
}

#[test]
fn missing_metadata_source_is_a_warning() {
    let events = capture_events(Level::INFO, || log_metadata_source("none", None, None));

    let selected = event(&events, "metadata_source.selected");
    assert_eq!(selected["level"], "WARN");
    assert_eq!(selected["fields"]["chain_requests"], "ineligible");
    assert!(selected["fields"].get("location").is_none());
}

#[test]
fn overview_route_logs_status_of_each_request() {
    let events = capture_events(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let app = overview_router(
                Arc::new(InMemoryPayloadFetcher::new()),
                Arc::new(MetadataSnapshot::default()),
                OverviewSettings::default(),
            );
            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/overview/dexs")
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("overview request should complete");

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        });
    });

    let request = &event(&events, "http.overview.request")["fields"];
    assert_eq!(request["status"], 404);
    assert_eq!(request["adapter_type"], "dexs");
    assert_eq!(request["chain"], "all");
}
