//! Overview assembly: one upstream payload in, one ranked chain overview out.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use crate::breakdown::{build_breakdown, decompose, BreakdownAxis, BreakdownEntry, Dominance};
use crate::hierarchy::VersionView;
use crate::metadata::{slugify, AdapterType, MetadataLookup};
use crate::normalize::{normalize_samples, MetricSeries, SECONDS_PER_DAY};
use crate::ranking::{assemble_ranking, RankingOptions, SortMetric};
use crate::record::{sorted_chain_names, ProtocolIdentity, ProtocolRecord};
use crate::upstream::{OverviewPayload, OverviewQuery, RawProtocol};
use crate::value::{merge_breakdowns, ChainBreakdown};
use crate::window::{aggregate_windows, ChangeSet, DayCutoff, PeriodTotals};

pub const ALL_CHAINS_LABEL: &str = "All";
pub const DEFAULT_TOP_CHAINS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRequest {
    pub adapter_type: AdapterType,
    pub chain: Option<String>,
    pub data_type: Option<String>,
    pub sort_by: SortMetric,
    pub version_view: VersionView,
    pub cutoff: DayCutoff,
    pub top_chains: usize,
}

impl OverviewRequest {
    pub fn new(adapter_type: AdapterType, cutoff: DayCutoff) -> Self {
        Self {
            adapter_type,
            chain: None,
            data_type: None,
            sort_by: SortMetric::default(),
            version_view: VersionView::default(),
            cutoff,
            top_chains: DEFAULT_TOP_CHAINS,
        }
    }

    pub fn query(&self) -> OverviewQuery {
        OverviewQuery {
            adapter_type: self.adapter_type,
            chain: self.chain.clone(),
            data_type: self.data_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownChartPoint {
    pub timestamp: i64,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOverview {
    pub chain: String,
    pub chain_display_name: String,
    pub adapter_type: AdapterType,
    pub data_type: Option<String>,
    #[serde(flatten)]
    pub totals: PeriodTotals,
    #[serde(flatten)]
    pub changes: ChangeSet,
    pub total_data_chart: Vec<ChartPoint>,
    pub total_data_chart_breakdown: Vec<BreakdownChartPoint>,
    pub protocols: Vec<ProtocolRecord>,
    pub all_chains: Vec<String>,
    pub chain_breakdown: Vec<BreakdownEntry>,
    pub dominance: Option<Dominance>,
}

impl ChainOverview {
    fn empty(request: &OverviewRequest, chain_display_name: String) -> Self {
        Self {
            chain: request
                .chain
                .clone()
                .unwrap_or_else(|| ALL_CHAINS_LABEL.to_string()),
            chain_display_name,
            adapter_type: request.adapter_type,
            data_type: request.data_type.clone(),
            totals: PeriodTotals::default(),
            changes: ChangeSet::default(),
            total_data_chart: Vec::new(),
            total_data_chart_breakdown: Vec::new(),
            protocols: Vec::new(),
            all_chains: Vec::new(),
            chain_breakdown: Vec::new(),
            dominance: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

/// Runs the whole rollup for one request. A chain that metadata does not
/// know, or knows but not for this adapter type, yields an empty overview.
pub fn build_chain_overview(
    payload: &OverviewPayload,
    request: &OverviewRequest,
    metadata: &dyn MetadataLookup,
) -> ChainOverview {
    let chain_meta = request
        .chain
        .as_deref()
        .map(|chain| metadata.lookup_chain(chain));
    let chain_display_name = match (&request.chain, &chain_meta) {
        (_, Some(Some(meta))) => meta.display_name.clone(),
        (Some(chain), _) => chain.clone(),
        (None, _) => ALL_CHAINS_LABEL.to_string(),
    };

    let eligible = match &chain_meta {
        None => true,
        Some(Some(meta)) => meta.tracks(request.adapter_type),
        Some(None) => false,
    };
    if !eligible {
        info!(
            component = "overview",
            event = "overview.chain_ineligible",
            adapter_type = %request.adapter_type,
            chain = request.chain.as_deref().unwrap_or(ALL_CHAINS_LABEL)
        );
        return ChainOverview::empty(request, chain_display_name);
    }

    let cutoff = request.cutoff;
    let leaves: Vec<ProtocolRecord> = payload
        .protocols
        .iter()
        .map(|raw| protocol_leaf(raw, request, metadata))
        .collect();

    let parent_ids: BTreeSet<&str> = leaves
        .iter()
        .filter_map(|leaf| leaf.parent_id.as_deref())
        .collect();
    let parents: BTreeMap<String, ProtocolIdentity> = parent_ids
        .into_iter()
        .filter_map(|id| metadata.lookup_parent(id).map(|parent| (id.to_string(), parent)))
        .collect();

    let ranking = assemble_ranking(
        leaves,
        &parents,
        &RankingOptions {
            sort_by: request.sort_by,
            chain: request.chain.clone(),
            version_view: request.version_view,
        },
    );

    let chart = chain_series(&payload.total_data_chart, request);
    let totals = if chart.is_empty() {
        PeriodTotals::sum_of(ranking.protocols.iter().map(|record| &record.totals))
    } else {
        aggregate_windows(&chart, &cutoff, &chain_display_name).totals
    };

    let breakdown_chart = normalize_samples(
        &payload.total_data_chart_breakdown,
        cutoff.incomplete_day(),
    );

    let mut breakdown24h = ChainBreakdown::new();
    for record in &ranking.protocols {
        merge_breakdowns(&mut breakdown24h, &record.breakdown24h);
    }
    let chain_breakdown = build_breakdown(
        decompose(&breakdown24h, BreakdownAxis::Chain),
        Some(request.top_chains),
    );

    let dominance = build_breakdown(
        ranking.protocols.iter().filter_map(|record| {
            record
                .totals
                .total24h
                .map(|value| BreakdownEntry::new(record.identity.display_name.clone(), value))
        }),
        None,
    )
    .dominance;

    let overview = ChainOverview {
        chain: request
            .chain
            .clone()
            .unwrap_or_else(|| ALL_CHAINS_LABEL.to_string()),
        chain_display_name,
        adapter_type: request.adapter_type,
        data_type: request.data_type.clone(),
        changes: totals.changes(),
        totals,
        total_data_chart: chart
            .iter()
            .map(|(day, value)| ChartPoint {
                timestamp: day * SECONDS_PER_DAY,
                value: value.total(),
            })
            .collect(),
        total_data_chart_breakdown: breakdown_chart
            .iter()
            .map(|(day, value)| BreakdownChartPoint {
                timestamp: day * SECONDS_PER_DAY,
                values: value.first_level_totals(),
            })
            .collect(),
        protocols: ranking.protocols,
        all_chains: ranking.all_chains,
        chain_breakdown: chain_breakdown.entries,
        dominance,
    };

    info!(
        component = "overview",
        event = "overview.build.finish",
        adapter_type = %request.adapter_type,
        chain = %overview.chain,
        sort_by = %request.sort_by,
        as_of_day = cutoff.as_of_day,
        exclude_incomplete_day = cutoff.exclude_incomplete_day,
        protocols = overview.protocols.len(),
        all_chains = overview.all_chains.len()
    );

    overview
}

fn protocol_leaf(
    raw: &RawProtocol,
    request: &OverviewRequest,
    metadata: &dyn MetadataLookup,
) -> ProtocolRecord {
    let series = chain_series(&raw.total_data_chart, request);
    let identity = raw.identity(metadata);
    let metrics = aggregate_windows(&series, &request.cutoff, &identity.display_name);

    ProtocolRecord::from_windowed(
        identity,
        raw.parent_id(metadata),
        raw.linked_protocols.iter().cloned().collect(),
        protocol_chains(raw, &series, metadata),
        metrics,
    )
}

/// One name per chain slug: the metadata display name when known, else the
/// breakdown key, else the name from the protocol's chain list.
fn protocol_chains(
    raw: &RawProtocol,
    series: &MetricSeries,
    metadata: &dyn MetadataLookup,
) -> Vec<String> {
    let mut by_slug: BTreeMap<String, String> = BTreeMap::new();
    for name in series.chain_names().into_iter().chain(raw.chains.iter().cloned()) {
        by_slug.entry(slugify(&name)).or_insert(name);
    }
    for (slug, name) in by_slug.iter_mut() {
        if let Some(chain) = metadata.lookup_chain(slug) {
            *name = chain.display_name;
        }
    }
    sorted_chain_names(by_slug)
}

/// Normalized series, restricted to the requested chain when there is one.
fn chain_series(raw: &[crate::normalize::RawSample], request: &OverviewRequest) -> MetricSeries {
    let series = normalize_samples(raw, request.cutoff.incomplete_day());
    match request.chain.as_deref() {
        Some(chain) => series.restrict_to_chain(chain),
        None => series,
    }
}
