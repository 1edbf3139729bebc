//! Metrics rollup core crate.
//!
//! Turns per-day, per-chain, per-protocol-version upstream series into ranked,
//! windowed overview records:
//! - day normalization and trailing-window totals/changes
//! - parent/child and linked-version folding
//! - chain/version breakdowns with dominance share
//! - ranking, overview assembly and the JSON HTTP surface

mod breakdown;
mod config;
mod dashboard;
mod hierarchy;
mod metadata;
mod normalize;
mod observability;
mod overview;
mod ranking;
mod record;
mod upstream;
mod value;
mod window;

pub use breakdown::{
    build_breakdown, decompose, sort_entries, BreakdownAxis, BreakdownEntry, BreakdownSummary,
    Dominance, OTHERS_LABEL,
};
pub use config::{
    rollup_config_from_env, ConfigError, RollupConfig, DEFAULT_BIND_ADDR,
    DEFAULT_METADATA_REFRESH_MS,
};
pub use dashboard::{
    overview_etag, overview_router, parse_overview_request, OverviewParams, OverviewSettings,
};
pub use hierarchy::{
    aggregate_children, resolve_hierarchy, VersionView, LINKED_ID_PREFIX, PARENT_ID_PREFIX,
};
pub use metadata::{
    refresh_once, slugify, spawn_metadata_refresh, AdapterType, ChainMetadata,
    FileMetadataFetcher, HttpMetadataFetcher, MetadataCache, MetadataError, MetadataFetcher,
    MetadataLookup, MetadataSnapshot, ProtocolMetadata, ReconcileReport,
};
pub use normalize::{
    day_index, normalize_samples, DailySample, MetricSeries, RawSample, SECONDS_PER_DAY,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_app_stop, log_metadata_source,
    log_payload_source, logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
    UnknownLogFormat,
};
pub use overview::{
    build_chain_overview, BreakdownChartPoint, ChainOverview, ChartPoint, OverviewRequest,
    ALL_CHAINS_LABEL, DEFAULT_TOP_CHAINS,
};
pub use ranking::{
    assemble_ranking, sort_records, Ranking, RankingError, RankingOptions, SortMetric,
};
pub use record::{dominant_chain, ProtocolIdentity, ProtocolRecord};
pub use upstream::{
    fetch_or_empty, overview_url, FilePayloadFetcher, HttpPayloadFetcher, InMemoryPayloadFetcher,
    OverviewPayload, OverviewQuery, PayloadFetcher, RawProtocol, UpstreamConfig, UpstreamError,
    DEFAULT_UPSTREAM_URL,
};
pub use value::{merge_breakdowns, ChainBreakdown, ValueNode};
pub use window::{
    aggregate_windows, percentage_change, ChangeSet, DayCutoff, PeriodTotals, WindowedMetrics,
    DAYS_PER_YEAR,
};
