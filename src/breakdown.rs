//! Chain/version decomposition, top-N capping and dominance share.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{finite_or_zero, ChainBreakdown};

pub const OTHERS_LABEL: &str = "Others";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub name: String,
    pub value: f64,
}

impl BreakdownEntry {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Share of the total held by the largest constituent, in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dominance {
    pub name: String,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownSummary {
    pub entries: Vec<BreakdownEntry>,
    pub total: f64,
    pub dominance: Option<Dominance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakdownAxis {
    Chain,
    Version,
}

/// Flattens a chain/version map along one axis.
pub fn decompose(breakdown: &ChainBreakdown, axis: BreakdownAxis) -> Vec<BreakdownEntry> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for (chain, versions) in breakdown {
        for (version, value) in versions {
            let key = match axis {
                BreakdownAxis::Chain => chain.as_str(),
                BreakdownAxis::Version => version.as_str(),
            };
            *totals.entry(key).or_insert(0.0) += finite_or_zero(Some(*value));
        }
    }

    totals
        .into_iter()
        .map(|(name, value)| BreakdownEntry::new(name, value))
        .collect()
}

/// Sorts and summarizes `entries`. Duplicate names are merged first. Dominance
/// always reflects the uncapped list; with `top_n`, entries past the cap are
/// folded into a trailing `Others` entry unless they sum to zero.
pub fn build_breakdown(
    entries: impl IntoIterator<Item = BreakdownEntry>,
    top_n: Option<usize>,
) -> BreakdownSummary {
    let mut merged: BTreeMap<String, f64> = BTreeMap::new();
    for entry in entries {
        *merged.entry(entry.name).or_insert(0.0) += finite_or_zero(Some(entry.value));
    }

    let mut sorted: Vec<BreakdownEntry> = merged
        .into_iter()
        .map(|(name, value)| BreakdownEntry { name, value })
        .collect();
    sort_entries(&mut sorted);

    let total: f64 = sorted.iter().map(|entry| entry.value).sum();
    let dominance = dominance_of(&sorted, total);

    let entries = match top_n {
        Some(limit) if sorted.len() > limit => {
            let rest = sorted.split_off(limit);
            let others: f64 = rest.iter().map(|entry| entry.value).sum();
            if others != 0.0 {
                sorted.push(BreakdownEntry::new(OTHERS_LABEL, others));
            }
            sorted
        }
        _ => sorted,
    };

    BreakdownSummary {
        entries,
        total,
        dominance,
    }
}

/// Descending by value, ties by name ascending.
pub fn sort_entries(entries: &mut [BreakdownEntry]) {
    entries.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn dominance_of(sorted: &[BreakdownEntry], total: f64) -> Option<Dominance> {
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    let top = sorted.first()?;
    let share = (top.value / total * 100.0).clamp(0.0, 100.0);
    share.is_finite().then(|| Dominance {
        name: top.name.clone(),
        share_pct: share,
    })
}
