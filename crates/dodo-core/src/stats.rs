//! Outcome aggregation: per-label latency summaries
//!
//! Outcomes are grouped by label into a `BTreeMap`, so the output order
//! is deterministic: numeric status labels sort ascending ahead of the
//! alphabetic error kinds. All reported durations are rounded to their 4
//! most significant decimal digits so identical inputs print identically.

use crate::engine::Outcome;
use std::collections::BTreeMap;
use std::time::Duration;

/// Header for the rendered summary table.
pub const TABLE_HEADER: [&str; 8] =
    ["Response", "Count", "Min", "Max", "Average", "P90", "P95", "P99"];

/// Statistics for one label group (or the Total row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSummary {
    pub label: String,
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LabelSummary {
    /// Cells in [`TABLE_HEADER`] order.
    pub fn row(&self) -> [String; 8] {
        [
            self.label.clone(),
            self.count.to_string(),
            format_duration(self.min),
            format_duration(self.max),
            format_duration(self.mean),
            format_duration(self.p90),
            format_duration(self.p95),
            format_duration(self.p99),
        ]
    }
}

/// The aggregated result of a run.
#[derive(Debug, Clone)]
pub struct Summary {
    /// One row per distinct label, deterministically ordered.
    pub rows: Vec<LabelSummary>,
    /// Statistics over all outcomes; present only when two or more
    /// distinct labels exist.
    pub total: Option<LabelSummary>,
}

/// Group outcomes by label and compute per-group and overall statistics.
pub fn summarize(outcomes: &[Outcome]) -> Summary {
    let mut groups: BTreeMap<&str, Vec<Duration>> = BTreeMap::new();
    for outcome in outcomes {
        groups.entry(outcome.label.as_str()).or_default().push(outcome.elapsed);
    }

    let rows: Vec<LabelSummary> = groups
        .into_iter()
        .map(|(label, elapsed)| summarize_group(label, elapsed))
        .collect();

    let total = (rows.len() >= 2).then(|| {
        summarize_group("Total", outcomes.iter().map(|o| o.elapsed).collect())
    });

    Summary { rows, total }
}

fn summarize_group(label: &str, mut elapsed: Vec<Duration>) -> LabelSummary {
    debug_assert!(!elapsed.is_empty());
    elapsed.sort_unstable();
    let count = elapsed.len();

    let sum: u128 = elapsed.iter().map(Duration::as_nanos).sum();
    let mean = Duration::from_nanos((sum / count as u128) as u64);
    let percentile = |q: f64| elapsed[percentile_index(count, q)];

    LabelSummary {
        label: label.to_string(),
        count,
        min: round_duration(elapsed[0]),
        max: round_duration(elapsed[count - 1]),
        mean: round_duration(mean),
        p90: round_duration(percentile(0.90)),
        p95: round_duration(percentile(0.95)),
        p99: round_duration(percentile(0.99)),
    }
}

/// Index of the q-th percentile in an ascending sample of size `n`:
/// `floor(q * (n - 1))`.
fn percentile_index(n: usize, q: f64) -> usize {
    ((n - 1) as f64 * q).floor() as usize
}

/// Round to the 4 most significant decimal digits of the nanosecond
/// magnitude, so printed summaries are byte-identical for identical
/// inputs.
pub fn round_duration(duration: Duration) -> Duration {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return duration;
    }
    let digits = nanos.ilog10() + 1;
    if digits <= 4 {
        return duration;
    }
    let factor = 10u128.pow(digits - 4);
    let rounded = (nanos + factor / 2) / factor * factor;
    Duration::from_nanos(rounded as u64)
}

/// Human-readable duration, e.g. `1.234ms`, `567.8µs`, `2.5s`.
pub fn format_duration(duration: Duration) -> String {
    format!("{duration:?}")
}
