//! Report types for a fuzz run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feedback::CoverageReport;
use crate::metrics::MetricsSnapshot;
use crate::oracle::FindingRecord;

/// Complete report from a fuzz run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzReport {
    /// Unique id of this run (uuid v4).
    pub run_id: String,
    /// Transport target, e.g. the base URL.
    pub target: String,
    /// Random seed used.
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: u64,
    pub stop_reason: StopReason,
    /// Iteration totals per terminal state.
    pub outcomes: OutcomeSummary,
    /// Sequences in the corpus at the end of the run.
    pub corpus_size: usize,
    /// Longest committed sequence.
    pub longest_sequence: usize,
    /// Distinct keys in the identifier table.
    pub id_keys: usize,
    pub coverage: CoverageReport,
    pub latency: LatencyProfile,
    /// Oracle findings, most frequent first.
    pub findings: Vec<FindingRecord>,
    pub findings_by_category: BTreeMap<String, u64>,
    pub metrics: MetricsSnapshot,
}

impl FuzzReport {
    /// One-paragraph human summary for the terminal.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Run {} against {}", self.run_id, self.target));
        lines.push(format!(
            "  stopped: {} after {} iterations ({} ms)",
            self.stop_reason, self.metrics.iterations, self.elapsed_ms
        ));
        lines.push(format!(
            "  committed {} / discarded {} / stalled {}",
            self.outcomes.committed, self.outcomes.discarded, self.outcomes.stalled
        ));
        lines.push(format!(
            "  corpus {} (longest {}), id keys {}, coverage {:.2}",
            self.corpus_size, self.longest_sequence, self.id_keys, self.coverage.score
        ));
        if self.findings.is_empty() {
            lines.push("  no findings".to_string());
        } else {
            lines.push(format!("  {} distinct findings:", self.findings.len()));
            for f in self.findings.iter().take(10) {
                lines.push(format!(
                    "    [{}] {} x{}",
                    f.kind.category(),
                    f.endpoint,
                    f.count
                ));
            }
        }
        lines.join("\n")
    }
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Iteration budget spent.
    Iterations,
    /// Time budget spent.
    Time,
    /// Every base stalled since the last commit, seed base included.
    SearchExhausted,
    /// Every reachable endpoint swept its covering array without new commits.
    MutationExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Iterations => "iteration budget",
            StopReason::Time => "time budget",
            StopReason::SearchExhausted => "search space exhausted",
            StopReason::MutationExhausted => "mutation exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub committed: u64,
    pub discarded: u64,
    pub stalled: u64,
    /// Discards grouped by error category; `not_interesting` for judged discards.
    pub discard_reasons: BTreeMap<String, u64>,
}

/// Response latency across executed requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub count: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

impl LatencyProfile {
    pub fn from_values(values: &mut [u64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_unstable();
        let len = values.len();
        let sum: u64 = values.iter().sum();
        Self {
            count: len,
            min_ms: values[0],
            max_ms: values[len - 1],
            avg_ms: sum / len as u64,
            p50_ms: values[len / 2],
            p99_ms: values[((len as f64 * 0.99) as usize).min(len - 1)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_profile() {
        let mut values = vec![30, 10, 20, 50, 40];
        let profile = LatencyProfile::from_values(&mut values);
        assert_eq!(profile.min_ms, 10);
        assert_eq!(profile.max_ms, 50);
        assert_eq!(profile.avg_ms, 30);
        assert_eq!(profile.p50_ms, 30);
        assert_eq!(profile.p99_ms, 50);

        let empty = LatencyProfile::from_values(&mut []);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_stop_reason_serialization() {
        let json = serde_json::to_string(&StopReason::SearchExhausted).unwrap();
        assert_eq!(json, "\"search_exhausted\"");
        assert_eq!(StopReason::Time.to_string(), "time budget");
    }
}
