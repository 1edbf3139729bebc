//! Chain filtering, hierarchy folding, sorting and rank assignment.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::hierarchy::{aggregate_children, resolve_hierarchy, VersionView};
use crate::metadata::slugify;
use crate::record::{insert_chain_name, sorted_chain_names, ProtocolIdentity, ProtocolRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RankingError {
    #[error("unknown sort metric: {0}")]
    UnknownMetric(String),
}

/// Record field a ranking can be sorted by. Parses from the serialized field
/// name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortMetric {
    #[default]
    Total24h,
    Total48hto24h,
    Total7d,
    Total14dto7d,
    Total30d,
    Total60dto30d,
    Total1y,
    TotalAllTime,
    Average1y,
    Change1d,
    Change7d,
    Change1m,
    Change7dover7d,
    Change30dover30d,
}

impl SortMetric {
    pub const ALL: [SortMetric; 14] = [
        SortMetric::Total24h,
        SortMetric::Total48hto24h,
        SortMetric::Total7d,
        SortMetric::Total14dto7d,
        SortMetric::Total30d,
        SortMetric::Total60dto30d,
        SortMetric::Total1y,
        SortMetric::TotalAllTime,
        SortMetric::Average1y,
        SortMetric::Change1d,
        SortMetric::Change7d,
        SortMetric::Change1m,
        SortMetric::Change7dover7d,
        SortMetric::Change30dover30d,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortMetric::Total24h => "total24h",
            SortMetric::Total48hto24h => "total48hto24h",
            SortMetric::Total7d => "total7d",
            SortMetric::Total14dto7d => "total14dto7d",
            SortMetric::Total30d => "total30d",
            SortMetric::Total60dto30d => "total60dto30d",
            SortMetric::Total1y => "total1y",
            SortMetric::TotalAllTime => "totalAllTime",
            SortMetric::Average1y => "average1y",
            SortMetric::Change1d => "change_1d",
            SortMetric::Change7d => "change_7d",
            SortMetric::Change1m => "change_1m",
            SortMetric::Change7dover7d => "change_7dover7d",
            SortMetric::Change30dover30d => "change_30dover30d",
        }
    }

    pub fn value_of(self, record: &ProtocolRecord) -> Option<f64> {
        let totals = &record.totals;
        let changes = &record.changes;
        let value = match self {
            SortMetric::Total24h => totals.total24h,
            SortMetric::Total48hto24h => totals.total48hto24h,
            SortMetric::Total7d => totals.total7d,
            SortMetric::Total14dto7d => totals.total14dto7d,
            SortMetric::Total30d => totals.total30d,
            SortMetric::Total60dto30d => totals.total60dto30d,
            SortMetric::Total1y => totals.total1y,
            SortMetric::TotalAllTime => totals.total_all_time,
            SortMetric::Average1y => changes.average_1y,
            SortMetric::Change1d => changes.change_1d,
            SortMetric::Change7d => changes.change_7d,
            SortMetric::Change1m => changes.change_1m,
            SortMetric::Change7dover7d => changes.change_7dover7d,
            SortMetric::Change30dover30d => changes.change_30dover30d,
        };
        value.filter(|v| v.is_finite())
    }
}

impl FromStr for SortMetric {
    type Err = RankingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        SortMetric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == trimmed)
            .ok_or_else(|| RankingError::UnknownMetric(raw.to_string()))
    }
}

impl fmt::Display for SortMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SortMetric {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortMetric {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingOptions {
    pub sort_by: SortMetric,
    pub chain: Option<String>,
    pub version_view: VersionView,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    pub protocols: Vec<ProtocolRecord>,
    pub all_chains: Vec<String>,
}

/// Filters `leaves` to the requested chain, folds the survivors into their
/// parents, sorts by the requested metric and assigns 1-based ranks.
/// `all_chains` always reflects the unfiltered input, one name per chain slug.
/// Leaf totals are taken as given, so leaves should already be scoped to the
/// requested chain.
pub fn assemble_ranking(
    leaves: Vec<ProtocolRecord>,
    parents: &BTreeMap<String, ProtocolIdentity>,
    options: &RankingOptions,
) -> Ranking {
    let mut all_chains = BTreeMap::new();
    for leaf in &leaves {
        for name in leaf.all_chain_names().values() {
            insert_chain_name(&mut all_chains, name);
        }
    }

    let input_count = leaves.len();
    let survivors: Vec<ProtocolRecord> = match options.chain.as_deref() {
        Some(chain) => {
            let wanted = slugify(chain);
            leaves
                .into_iter()
                .filter_map(|record| retain_on_chain(record, &wanted, options.sort_by))
                .collect()
        }
        None => leaves,
    };

    let mut protocols = resolve_hierarchy(survivors, parents, options.version_view);
    sort_records(&mut protocols, options.sort_by);
    for (idx, record) in protocols.iter_mut().enumerate() {
        record.rank = Some(idx + 1);
    }

    debug!(
        component = "ranking",
        event = "ranking.assembled",
        sort_by = %options.sort_by,
        chain = options.chain.as_deref().unwrap_or("all"),
        input_records = input_count,
        ranked_records = protocols.len()
    );

    Ranking {
        protocols,
        all_chains: sorted_chain_names(all_chains),
    }
}

/// Sorts descending by `metric` with nulls last, ties by name then id. Sub-rows
/// are sorted the same way.
pub fn sort_records(records: &mut [ProtocolRecord], metric: SortMetric) {
    records.sort_by(|a, b| compare_records(a, b, metric));
    for record in records.iter_mut() {
        sort_records(&mut record.sub_rows, metric);
    }
}

fn compare_records(a: &ProtocolRecord, b: &ProtocolRecord, metric: SortMetric) -> Ordering {
    let by_metric = match (metric.value_of(a), metric.value_of(b)) {
        (Some(left), Some(right)) => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_metric
        .then_with(|| a.identity.name.cmp(&b.identity.name))
        .then_with(|| a.id().cmp(b.id()))
}

/// A leaf qualifies when it is on the chain with a value for the metric. An
/// already-folded record is rebuilt from its qualifying children only.
fn retain_on_chain(
    record: ProtocolRecord,
    chain_slug: &str,
    metric: SortMetric,
) -> Option<ProtocolRecord> {
    if !record.is_aggregate() {
        let qualifies = record.is_on_chain(chain_slug) && metric.value_of(&record).is_some();
        return qualifies.then_some(record);
    }

    let ProtocolRecord {
        identity,
        sub_rows,
        ..
    } = record;
    let children: Vec<ProtocolRecord> = sub_rows
        .into_iter()
        .filter_map(|child| retain_on_chain(child, chain_slug, metric))
        .collect();
    (!children.is_empty()).then(|| aggregate_children(identity, children))
}
