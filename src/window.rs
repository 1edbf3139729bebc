//! Trailing-window totals and period-over-period changes for one daily series.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::normalize::{MetricSeries, SECONDS_PER_DAY};
use crate::value::{ChainBreakdown, ValueNode};

pub const DAYS_PER_YEAR: i64 = 365;

/// Reference day for every window, and whether that day is still
/// accumulating and must be left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCutoff {
    pub as_of_day: i64,
    pub exclude_incomplete_day: bool,
}

impl DayCutoff {
    pub fn at(as_of_day: i64) -> Self {
        Self {
            as_of_day,
            exclude_incomplete_day: false,
        }
    }

    pub fn today(exclude_incomplete_day: bool) -> Self {
        Self {
            as_of_day: Utc::now().timestamp().div_euclid(SECONDS_PER_DAY),
            exclude_incomplete_day,
        }
    }

    /// Last day whose value counts as final.
    pub fn end_day(&self) -> i64 {
        if self.exclude_incomplete_day {
            self.as_of_day - 1
        } else {
            self.as_of_day
        }
    }

    /// Day the normalizer should drop, if any.
    pub fn incomplete_day(&self) -> Option<i64> {
        self.exclude_incomplete_day.then_some(self.as_of_day)
    }
}

/// Summable window totals. `None` means nothing was reported in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub total24h: Option<f64>,
    pub total48hto24h: Option<f64>,
    pub total7d: Option<f64>,
    pub total14dto7d: Option<f64>,
    pub total30d: Option<f64>,
    pub total60dto30d: Option<f64>,
    pub total1y: Option<f64>,
    pub total_all_time: Option<f64>,
}

/// Changes and averages derived from [`PeriodTotals`]; recomputed, never summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub change_1d: Option<f64>,
    pub change_7d: Option<f64>,
    pub change_1m: Option<f64>,
    pub change_7dover7d: Option<f64>,
    pub change_30dover30d: Option<f64>,
    #[serde(rename = "average1y")]
    pub average_1y: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowedMetrics {
    pub totals: PeriodTotals,
    pub changes: ChangeSet,
    pub breakdown24h: ChainBreakdown,
    pub breakdown30d: ChainBreakdown,
}

impl PeriodTotals {
    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            change_1d: percentage_change(self.total24h, self.total48hto24h),
            change_7d: percentage_change(self.total24h, daily_average(self.total7d, 7)),
            change_1m: percentage_change(self.total24h, daily_average(self.total30d, 30)),
            change_7dover7d: percentage_change(self.total7d, self.total14dto7d),
            change_30dover30d: percentage_change(self.total30d, self.total60dto30d),
            average_1y: daily_average(self.total1y, DAYS_PER_YEAR),
        }
    }

    /// Field-by-field sum. A `None` counts as zero, but a field stays `None`
    /// when every input is `None`.
    pub fn sum_of<'a>(items: impl IntoIterator<Item = &'a PeriodTotals>) -> PeriodTotals {
        items
            .into_iter()
            .fold(PeriodTotals::default(), |acc, item| PeriodTotals {
                total24h: sum_optional(acc.total24h, item.total24h),
                total48hto24h: sum_optional(acc.total48hto24h, item.total48hto24h),
                total7d: sum_optional(acc.total7d, item.total7d),
                total14dto7d: sum_optional(acc.total14dto7d, item.total14dto7d),
                total30d: sum_optional(acc.total30d, item.total30d),
                total60dto30d: sum_optional(acc.total60dto30d, item.total60dto30d),
                total1y: sum_optional(acc.total1y, item.total1y),
                total_all_time: sum_optional(acc.total_all_time, item.total_all_time),
            })
    }
}

/// Computes every window total, change and breakdown for `series` as of
/// `cutoff`. Chains holding a plain number are labelled `version_label` in
/// the breakdowns.
pub fn aggregate_windows(
    series: &MetricSeries,
    cutoff: &DayCutoff,
    version_label: &str,
) -> WindowedMetrics {
    let end = cutoff.end_day();

    let totals = PeriodTotals {
        total24h: point_value(series, end),
        total48hto24h: point_value(series, end - 1),
        total7d: window_sum(series, end - 6, end),
        total14dto7d: window_sum(series, end - 13, end - 7),
        total30d: window_sum(series, end - 29, end),
        total60dto30d: window_sum(series, end - 59, end - 30),
        total1y: window_sum(series, end - (DAYS_PER_YEAR - 1), end),
        total_all_time: series
            .first_day()
            .and_then(|first| window_sum(series, first, end)),
    };

    let breakdown24h = series
        .get(end)
        .map(|value| value.to_chain_breakdown(version_label))
        .unwrap_or_default();

    let mut window_30d: Option<ValueNode> = None;
    for (_, value) in series.range(end - 29, end) {
        window_30d = Some(match window_30d.take() {
            Some(mut acc) => {
                acc.merge(value.clone());
                acc
            }
            None => value.clone(),
        });
    }
    let breakdown30d = window_30d
        .map(|value| value.to_chain_breakdown(version_label))
        .unwrap_or_default();

    WindowedMetrics {
        changes: totals.changes(),
        totals,
        breakdown24h,
        breakdown30d,
    }
}

/// `(current - previous) / previous * 100`, or `None` when either side is
/// missing, the denominator is zero or the result is not finite.
pub fn percentage_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = current.filter(|v| v.is_finite())?;
    let previous = previous.filter(|v| v.is_finite() && *v != 0.0)?;
    let change = (current - previous) / previous * 100.0;
    change.is_finite().then_some(change)
}

fn daily_average(total: Option<f64>, days: i64) -> Option<f64> {
    let average = total.filter(|v| v.is_finite())? / days as f64;
    average.is_finite().then_some(average)
}

fn point_value(series: &MetricSeries, day: i64) -> Option<f64> {
    series.get(day).map(ValueNode::total)
}

fn window_sum(series: &MetricSeries, start: i64, end: i64) -> Option<f64> {
    series
        .range(start, end)
        .fold(None, |acc, (_, value)| sum_optional(acc, Some(value.total())))
}

fn sum_optional(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (None, None) => None,
        (left, right) => Some(left.unwrap_or(0.0) + right.unwrap_or(0.0)),
    }
}
