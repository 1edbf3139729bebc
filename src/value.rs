//! Recursive per-day value: a plain number or a chain/version breakdown.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::metadata::slugify;

/// `chain -> version -> value`.
pub type ChainBreakdown = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValueNode {
    Scalar(f64),
    Breakdown(BTreeMap<String, ValueNode>),
}

impl Default for ValueNode {
    fn default() -> Self {
        Self::Scalar(0.0)
    }
}

impl ValueNode {
    /// Builds a node from untyped upstream JSON. Anything that is not a finite
    /// number, a numeric string, or an object becomes `Scalar(0.0)`.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Number(number) => Self::Scalar(finite_or_zero(number.as_f64())),
            serde_json::Value::String(text) => {
                Self::Scalar(finite_or_zero(text.trim().parse::<f64>().ok()))
            }
            serde_json::Value::Object(entries) => Self::Breakdown(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
            serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Array(_) => {
                Self::Scalar(0.0)
            }
        }
    }

    pub fn total(&self) -> f64 {
        match self {
            Self::Scalar(value) => finite_or_zero(Some(*value)),
            Self::Breakdown(entries) => entries.values().map(Self::total).sum(),
        }
    }

    /// Same shape with every non-finite leaf replaced by 0.
    pub fn sanitized(&self) -> ValueNode {
        match self {
            Self::Scalar(value) => Self::Scalar(finite_or_zero(Some(*value))),
            Self::Breakdown(entries) => Self::Breakdown(
                entries
                    .iter()
                    .map(|(key, node)| (key.clone(), node.sanitized()))
                    .collect(),
            ),
        }
    }

    /// Element-wise sum. Matching keys add, other keys are unioned. A scalar
    /// meeting a breakdown at the same position collapses to a scalar.
    pub fn merge(&mut self, other: ValueNode) {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => {
                *left = finite_or_zero(Some(*left)) + finite_or_zero(Some(right));
            }
            (Self::Breakdown(left), Self::Breakdown(right)) => {
                for (key, node) in right {
                    match left.entry(key) {
                        Entry::Occupied(mut slot) => slot.get_mut().merge(node),
                        Entry::Vacant(slot) => {
                            slot.insert(node);
                        }
                    }
                }
            }
            (this, other) => {
                let combined = this.total() + other.total();
                *this = Self::Scalar(combined);
            }
        }
    }

    /// Keeps only the entries for `chain` (compared by slug), still keyed by
    /// chain. Scalars carry no chain information and are taken as already
    /// scoped to the requested chain.
    pub fn restrict_to_chain(&self, chain: &str) -> Option<ValueNode> {
        match self {
            Self::Scalar(_) => Some(self.clone()),
            Self::Breakdown(entries) => {
                let wanted = slugify(chain);
                let kept: BTreeMap<String, ValueNode> = entries
                    .iter()
                    .filter(|(key, _)| slugify(key) == wanted)
                    .map(|(key, node)| (key.clone(), node.clone()))
                    .collect();
                (!kept.is_empty()).then_some(Self::Breakdown(kept))
            }
        }
    }

    pub fn chain_names(&self) -> Vec<String> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Breakdown(entries) => entries.keys().cloned().collect(),
        }
    }

    /// Flattens the node into `chain -> version -> value`. A chain holding a
    /// plain number is filed under `version_label`. Scalar roots have no chain
    /// dimension and produce an empty map.
    pub fn to_chain_breakdown(&self, version_label: &str) -> ChainBreakdown {
        let mut out = ChainBreakdown::new();
        let Self::Breakdown(chains) = self else {
            return out;
        };

        for (chain, node) in chains {
            let versions = out.entry(chain.clone()).or_default();
            match node {
                Self::Scalar(value) => {
                    *versions.entry(version_label.to_string()).or_insert(0.0) +=
                        finite_or_zero(Some(*value));
                }
                Self::Breakdown(by_version) => {
                    for (version, value) in by_version {
                        *versions.entry(version.clone()).or_insert(0.0) += value.total();
                    }
                }
            }
        }

        out
    }

    /// First-level totals (`name -> total`).
    pub fn first_level_totals(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Scalar(_) => BTreeMap::new(),
            Self::Breakdown(entries) => entries
                .iter()
                .map(|(key, node)| (key.clone(), node.total()))
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for ValueNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&raw))
    }
}

/// Sums `other` into `into`, chain by chain and version by version.
pub fn merge_breakdowns(into: &mut ChainBreakdown, other: &ChainBreakdown) {
    for (chain, versions) in other {
        let target = into.entry(chain.clone()).or_default();
        for (version, value) in versions {
            *target.entry(version.clone()).or_insert(0.0) += finite_or_zero(Some(*value));
        }
    }
}

pub(crate) fn finite_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(raw: serde_json::Value) -> ValueNode {
        ValueNode::from_json(&raw)
    }

    #[test]
    fn malformed_leaves_become_zero() {
        let parsed = node(json!({"ethereum": "oops", "arbitrum": null, "base": "12.5", "op": [1]}));
        assert_eq!(parsed.total(), 12.5);
        assert_eq!(
            parsed.first_level_totals().get("ethereum").copied(),
            Some(0.0)
        );
    }

    #[test]
    fn merge_sums_matching_keys_and_unions_others() {
        let mut left = node(json!({"ethereum": {"v2": 10, "v3": 5}, "arbitrum": 4}));
        left.merge(node(json!({"ethereum": {"v3": 1}, "base": 2})));

        assert_eq!(
            left,
            node(json!({"ethereum": {"v2": 10, "v3": 6}, "arbitrum": 4, "base": 2}))
        );
    }

    #[test]
    fn shape_mismatch_collapses_to_scalar() {
        let mut left = node(json!({"ethereum": 3}));
        left.merge(ValueNode::Scalar(2.0));
        assert_eq!(left, ValueNode::Scalar(5.0));
    }

    #[test]
    fn restrict_matches_chain_slug_case_insensitively() {
        let value = node(json!({"Ethereum": {"v2": 7}, "Arbitrum": 3}));
        assert_eq!(
            value.restrict_to_chain("ethereum"),
            Some(node(json!({"Ethereum": {"v2": 7}})))
        );
        assert_eq!(value.restrict_to_chain("base"), None);
        assert_eq!(
            ValueNode::Scalar(9.0).restrict_to_chain("base"),
            Some(ValueNode::Scalar(9.0))
        );
    }

    #[test]
    fn chain_breakdown_files_plain_chains_under_label() {
        let value = node(json!({"ethereum": {"v2": 7, "v3": 1}, "arbitrum": 3}));
        let breakdown = value.to_chain_breakdown("Uniswap");

        assert_eq!(breakdown["ethereum"]["v2"], 7.0);
        assert_eq!(breakdown["arbitrum"]["Uniswap"], 3.0);
        assert!(ValueNode::Scalar(1.0).to_chain_breakdown("x").is_empty());
    }

    #[test]
    fn serializes_as_plain_json() {
        let value = node(json!({"ethereum": 1.5}));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"ethereum": 1.5})
        );
    }
}
