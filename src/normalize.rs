//! Day normalization: raw `(timestamp, value)` samples to one value per UTC day.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::value::ValueNode;

pub const SECONDS_PER_DAY: i64 = 86_400;

// Upstream charts mix second and millisecond timestamps.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// One upstream chart point, serialized as `[timestamp, value]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample(pub i64, pub ValueNode);

impl RawSample {
    pub fn new(timestamp: i64, value: ValueNode) -> Self {
        Self(timestamp, value)
    }

    pub fn scalar(timestamp: i64, value: f64) -> Self {
        Self(timestamp, ValueNode::Scalar(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySample {
    pub day: i64,
    pub value: ValueNode,
}

/// Samples keyed by UTC day index, ascending, gaps left unfilled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    days: BTreeMap<i64, ValueNode>,
}

impl MetricSeries {
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn get(&self, day: i64) -> Option<&ValueNode> {
        self.days.get(&day)
    }

    pub fn first_day(&self) -> Option<i64> {
        self.days.keys().next().copied()
    }

    pub fn last_day(&self) -> Option<i64> {
        self.days.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &ValueNode)> + '_ {
        self.days.iter().map(|(day, value)| (*day, value))
    }

    /// Samples with `start <= day <= end`.
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = (i64, &ValueNode)> + '_ {
        self.days
            .range(start..=end.max(start))
            .filter(move |(day, _)| **day <= end)
            .map(|(day, value)| (*day, value))
    }

    pub fn samples(&self) -> Vec<DailySample> {
        self.iter()
            .map(|(day, value)| DailySample {
                day,
                value: value.clone(),
            })
            .collect()
    }

    /// Re-expands the series into day-start raw samples.
    pub fn to_raw_samples(&self) -> Vec<RawSample> {
        self.iter()
            .map(|(day, value)| RawSample(day * SECONDS_PER_DAY, value.clone()))
            .collect()
    }

    /// Keeps only the requested chain on every day; days without it drop out.
    pub fn restrict_to_chain(&self, chain: &str) -> MetricSeries {
        MetricSeries {
            days: self
                .days
                .iter()
                .filter_map(|(day, value)| value.restrict_to_chain(chain).map(|v| (*day, v)))
                .collect(),
        }
    }

    /// Every first-level breakdown key seen on any day.
    pub fn chain_names(&self) -> BTreeSet<String> {
        self.days
            .values()
            .flat_map(ValueNode::chain_names)
            .collect()
    }
}

impl FromIterator<DailySample> for MetricSeries {
    fn from_iter<T: IntoIterator<Item = DailySample>>(iter: T) -> Self {
        let mut days: BTreeMap<i64, ValueNode> = BTreeMap::new();
        for sample in iter {
            merge_day(&mut days, sample.day, sample.value);
        }
        Self { days }
    }
}

pub fn day_index(timestamp: i64) -> i64 {
    normalize_to_seconds(timestamp).div_euclid(SECONDS_PER_DAY)
}

/// Collapses raw samples into one value per UTC day. Non-finite leaves become
/// 0 and same-day samples are summed recursively. With
/// `exclude_current_day = Some(day)`, the most recent day is dropped when it is
/// that day.
pub fn normalize_samples(raw: &[RawSample], exclude_current_day: Option<i64>) -> MetricSeries {
    let mut series: MetricSeries = raw
        .iter()
        .map(|RawSample(timestamp, value)| DailySample {
            day: day_index(*timestamp),
            value: value.sanitized(),
        })
        .collect();

    if let (Some(current_day), Some(last_day)) = (exclude_current_day, series.last_day()) {
        if last_day == current_day {
            series.days.remove(&last_day);
            debug!(
                component = "normalize",
                event = "normalize.incomplete_day_dropped",
                day = last_day
            );
        }
    }

    series
}

fn merge_day(days: &mut BTreeMap<i64, ValueNode>, day: i64, value: ValueNode) {
    match days.entry(day) {
        Entry::Occupied(mut slot) => slot.get_mut().merge(value),
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

fn normalize_to_seconds(timestamp: i64) -> i64 {
    if timestamp.abs() >= MILLIS_THRESHOLD {
        timestamp / 1_000
    } else {
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DAY: i64 = SECONDS_PER_DAY;

    #[test]
    fn day_index_floors_seconds_and_millis() {
        assert_eq!(day_index(0), 0);
        assert_eq!(day_index(DAY - 1), 0);
        assert_eq!(day_index(DAY), 1);
        assert_eq!(day_index(-1), -1);
        assert_eq!(day_index(1_700_000_000), 19_675);
        assert_eq!(day_index(1_700_000_000_000), 19_675);
    }

    #[test]
    fn same_day_samples_are_summed() {
        let raw = vec![
            RawSample::scalar(DAY + 10, 4.0),
            RawSample::scalar(DAY + 3_600, 6.0),
            RawSample::scalar(3 * DAY, 1.0),
        ];
        let series = normalize_samples(&raw, None);

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(1), Some(&ValueNode::Scalar(10.0)));
        assert_eq!(series.get(2), None);
        assert_eq!(series.get(3), Some(&ValueNode::Scalar(1.0)));
    }

    #[test]
    fn nested_same_day_samples_union_keys() {
        let raw: Vec<RawSample> = serde_json::from_value(json!([
            [86400, {"ethereum": {"v2": 1}}],
            [86401, {"ethereum": {"v3": 2}, "base": 3}],
        ]))
        .unwrap();
        let series = normalize_samples(&raw, None);

        assert_eq!(series.len(), 1);
        assert_eq!(
            series.get(1),
            Some(&ValueNode::from_json(
                &json!({"ethereum": {"v2": 1, "v3": 2}, "base": 3})
            ))
        );
    }

    #[test]
    fn exclude_current_day_only_drops_matching_last_day() {
        let raw = vec![RawSample::scalar(DAY, 1.0), RawSample::scalar(2 * DAY, 2.0)];

        assert_eq!(normalize_samples(&raw, Some(2)).len(), 1);
        assert_eq!(normalize_samples(&raw, Some(3)).len(), 2);
        assert_eq!(normalize_samples(&raw, None).len(), 2);
    }

    #[test]
    fn range_is_inclusive_and_empty_when_inverted() {
        let raw = vec![
            RawSample::scalar(DAY, 1.0),
            RawSample::scalar(2 * DAY, 2.0),
            RawSample::scalar(5 * DAY, 5.0),
        ];
        let series = normalize_samples(&raw, None);

        let days: Vec<i64> = series.range(1, 2).map(|(day, _)| day).collect();
        assert_eq!(days, vec![1, 2]);
        assert_eq!(series.range(3, 4).count(), 0);
        assert_eq!(series.range(5, 1).count(), 0);
    }
}
