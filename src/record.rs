//! Protocol rows as handed to the presentation layer.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::breakdown::{build_breakdown, decompose, BreakdownAxis, Dominance};
use crate::metadata::slugify;
use crate::value::ChainBreakdown;
use crate::window::{ChangeSet, PeriodTotals, WindowedMetrics};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolIdentity {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub slug: String,
    pub logo: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRecord {
    #[serde(flatten)]
    pub identity: ProtocolIdentity,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub linked_protocol_ids: BTreeSet<String>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(flatten)]
    pub totals: PeriodTotals,
    #[serde(flatten)]
    pub changes: ChangeSet,
    #[serde(default)]
    pub breakdown24h: ChainBreakdown,
    #[serde(default)]
    pub breakdown30d: ChainBreakdown,
    pub dominant_chain: Option<Dominance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_rows: Vec<ProtocolRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
}

impl ProtocolRecord {
    /// Leaf row built from one protocol's windowed metrics.
    pub fn from_windowed(
        identity: ProtocolIdentity,
        parent_id: Option<String>,
        linked_protocol_ids: BTreeSet<String>,
        chains: Vec<String>,
        metrics: WindowedMetrics,
    ) -> Self {
        let dominant_chain = dominant_chain(&metrics.breakdown24h);
        Self {
            identity,
            parent_id,
            linked_protocol_ids,
            chains,
            totals: metrics.totals,
            changes: metrics.changes,
            breakdown24h: metrics.breakdown24h,
            breakdown30d: metrics.breakdown30d,
            dominant_chain,
            linked_protocols: Vec::new(),
            sub_rows: Vec::new(),
            rank: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn is_aggregate(&self) -> bool {
        !self.sub_rows.is_empty()
    }

    /// True when the row reports `chain`. The breakdown keys decide when the
    /// row has any; the `chains` list is the fallback for scalar series.
    /// Totals are not re-scoped, so callers pass rows already restricted to
    /// the chain.
    pub fn is_on_chain(&self, chain_slug: &str) -> bool {
        let matches = |name: &String| slugify(name) == chain_slug;
        if self.breakdown24h.is_empty() && self.breakdown30d.is_empty() {
            self.chains.iter().any(matches)
        } else {
            self.breakdown24h
                .keys()
                .chain(self.breakdown30d.keys())
                .any(matches)
        }
    }

    /// Every chain on the row, its sub-rows and its breakdowns, keyed by slug.
    /// Spellings from `chains` win over breakdown keys.
    pub fn all_chain_names(&self) -> BTreeMap<String, String> {
        let mut names = BTreeMap::new();
        for name in &self.chains {
            insert_chain_name(&mut names, name);
        }
        for child in &self.sub_rows {
            for name in child.all_chain_names().values() {
                insert_chain_name(&mut names, name);
            }
        }
        for name in self.breakdown24h.keys().chain(self.breakdown30d.keys()) {
            names
                .entry(slugify(name))
                .or_insert_with(|| name.clone());
        }
        names
    }
}

/// Files `name` under its slug. Of two spellings for one slug the smaller is
/// kept, so the outcome does not depend on insertion order.
pub(crate) fn insert_chain_name(names: &mut BTreeMap<String, String>, name: &str) {
    match names.entry(slugify(name)) {
        Entry::Occupied(mut slot) => {
            if name < slot.get().as_str() {
                slot.insert(name.to_string());
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(name.to_string());
        }
    }
}

/// One name per chain slug, sorted by name.
pub(crate) fn sorted_chain_names(by_slug: BTreeMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = by_slug.into_values().collect();
    names.sort();
    names
}

pub fn dominant_chain(breakdown: &ChainBreakdown) -> Option<Dominance> {
    build_breakdown(decompose(breakdown, BreakdownAxis::Chain), None).dominance
}
