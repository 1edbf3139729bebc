//! Parent/child and linked-version folding.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::slugify;
use crate::record::{
    dominant_chain, insert_chain_name, sorted_chain_names, ProtocolIdentity, ProtocolRecord,
};
use crate::value::{merge_breakdowns, ChainBreakdown};
use crate::window::PeriodTotals;

pub const PARENT_ID_PREFIX: &str = "parent#";
pub const LINKED_ID_PREFIX: &str = "linked#";

/// Whether sibling versions linked without a parent are shown one row each or
/// folded into a single "all versions" row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionView {
    #[default]
    Separate,
    Combined,
}

/// Folds every record carrying a `parent_id` into a synthesized aggregate for
/// that parent, with the children kept as `sub_rows`. Parent identities come
/// from `parents` when present. The output is ordered by id.
pub fn resolve_hierarchy(
    records: Vec<ProtocolRecord>,
    parents: &BTreeMap<String, ProtocolIdentity>,
    view: VersionView,
) -> Vec<ProtocolRecord> {
    let input_count = records.len();
    let mut top_level = Vec::with_capacity(records.len());
    let mut families: BTreeMap<String, Vec<ProtocolRecord>> = BTreeMap::new();

    for record in records {
        match record.parent_id.clone() {
            Some(parent_id) => families.entry(parent_id).or_default().push(record),
            None => top_level.push(record),
        }
    }

    if view == VersionView::Combined {
        top_level = combine_linked_versions(top_level);
    }

    let family_count = families.len();
    for (parent_id, children) in families {
        let identity = parents
            .get(&parent_id)
            .cloned()
            .unwrap_or_else(|| synthesize_parent_identity(&parent_id, &children));
        top_level.push(aggregate_children(identity, children));
    }

    top_level.sort_by(|a, b| a.id().cmp(b.id()));

    debug!(
        component = "hierarchy",
        event = "hierarchy.resolved",
        input_records = input_count,
        parents = family_count,
        output_records = top_level.len(),
        view = ?view
    );

    top_level
}

/// Sums `children` into one row. Totals add with nulls counted as zero and
/// stay null only when every child is null; changes are recomputed from the
/// summed totals. Children are ordered by id first so the result does not
/// depend on input order.
pub fn aggregate_children(
    identity: ProtocolIdentity,
    mut children: Vec<ProtocolRecord>,
) -> ProtocolRecord {
    children.sort_by(|a, b| a.id().cmp(b.id()));

    let totals = PeriodTotals::sum_of(children.iter().map(|child| &child.totals));

    let mut breakdown24h = ChainBreakdown::new();
    let mut breakdown30d = ChainBreakdown::new();
    let mut chains = BTreeMap::new();
    let mut linked_protocols = BTreeSet::new();
    for child in &children {
        merge_breakdowns(&mut breakdown24h, &child.breakdown24h);
        merge_breakdowns(&mut breakdown30d, &child.breakdown30d);
        for chain in &child.chains {
            insert_chain_name(&mut chains, chain);
        }
        linked_protocols.insert(child.identity.slug.clone());
    }

    ProtocolRecord {
        identity,
        parent_id: None,
        linked_protocol_ids: BTreeSet::new(),
        chains: sorted_chain_names(chains),
        changes: totals.changes(),
        totals,
        dominant_chain: dominant_chain(&breakdown24h),
        breakdown24h,
        breakdown30d,
        linked_protocols: linked_protocols.into_iter().collect(),
        sub_rows: children,
        rank: None,
    }
}

fn synthesize_parent_identity(parent_id: &str, children: &[ProtocolRecord]) -> ProtocolIdentity {
    let name = parent_id
        .strip_prefix(PARENT_ID_PREFIX)
        .unwrap_or(parent_id)
        .to_string();
    let first = children.iter().min_by(|a, b| a.id().cmp(b.id()));

    let categories: BTreeSet<Option<&String>> = children
        .iter()
        .map(|child| child.identity.category.as_ref())
        .collect();
    let category = match categories.into_iter().collect::<Vec<_>>().as_slice() {
        [Some(single)] => Some((*single).clone()),
        _ => None,
    };

    ProtocolIdentity {
        id: parent_id.to_string(),
        slug: slugify(&name),
        display_name: name.clone(),
        name,
        logo: first.and_then(|child| child.identity.logo.clone()),
        category,
    }
}

/// Groups records connected through `linked_protocol_ids` (in either
/// direction) and folds every group of two or more into one row keyed by the
/// lexicographically first sibling id.
fn combine_linked_versions(records: Vec<ProtocolRecord>) -> Vec<ProtocolRecord> {
    let index_by_id: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.id(), idx))
        .collect();

    let mut groups = DisjointSet::new(records.len());
    for (idx, record) in records.iter().enumerate() {
        for linked in &record.linked_protocol_ids {
            if let Some(&other) = index_by_id.get(linked.as_str()) {
                groups.union(idx, other);
            }
        }
    }

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..records.len() {
        members.entry(groups.find(idx)).or_default().push(idx);
    }

    let mut slots: Vec<Option<ProtocolRecord>> = records.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    for indices in members.into_values() {
        let group: Vec<ProtocolRecord> = indices
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();

        if group.len() < 2 {
            out.extend(group);
            continue;
        }

        let Some(first) = group.iter().min_by(|a, b| a.id().cmp(b.id())) else {
            continue;
        };
        let mut identity = first.identity.clone();
        identity.id = format!("{LINKED_ID_PREFIX}{}", first.id());
        out.push(aggregate_children(identity, group));
    }

    out
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            self.parent[root_a.max(root_b)] = root_a.min(root_b);
        }
    }
}
