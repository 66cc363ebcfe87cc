//! Run counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine counters (thread-safe, cheap to clone into workers).
#[derive(Debug, Clone)]
pub struct FuzzMetrics {
    pub iterations: Arc<AtomicU64>,
    pub committed: Arc<AtomicU64>,
    pub discarded: Arc<AtomicU64>,
    pub stalled: Arc<AtomicU64>,
    /// Requests that produced no response
    pub transport_errors: Arc<AtomicU64>,
    pub unresolved: Arc<AtomicU64>,
    pub schema_violations: Arc<AtomicU64>,
    /// Oracle findings, including repeats
    pub findings: Arc<AtomicU64>,
}

impl Default for FuzzMetrics {
    fn default() -> Self {
        Self {
            iterations: Arc::new(AtomicU64::new(0)),
            committed: Arc::new(AtomicU64::new(0)),
            discarded: Arc::new(AtomicU64::new(0)),
            stalled: Arc::new(AtomicU64::new(0)),
            transport_errors: Arc::new(AtomicU64::new(0)),
            unresolved: Arc::new(AtomicU64::new(0)),
            schema_violations: Arc::new(AtomicU64::new(0)),
            findings: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl FuzzMetrics {
    /// Claim the next iteration number. Returns the 1-based index.
    pub fn next_iteration(&self) -> u64 {
        self.iterations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stalled(&self) {
        self.stalled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schema_violation(&self) {
        self.schema_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_findings(&self, n: u64) {
        self.findings.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            schema_violations: self.schema_violations.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`FuzzMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub iterations: u64,
    pub committed: u64,
    pub discarded: u64,
    pub stalled: u64,
    pub transport_errors: u64,
    pub unresolved: u64,
    pub schema_violations: u64,
    pub findings: u64,
}

impl MetricsSnapshot {
    /// Fraction of finished iterations that were committed.
    pub fn commit_rate(&self) -> f64 {
        let total = self.committed + self.discarded + self.stalled;
        if total == 0 {
            return 0.0;
        }
        self.committed as f64 / total as f64
    }

    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        lines.push("Fuzz Metrics".to_string());
        lines.push("=".repeat(40));
        lines.push(format!("  Iterations:        {}", self.iterations));
        lines.push(format!(
            "  Committed:         {} ({:.1}%)",
            self.committed,
            self.commit_rate() * 100.0
        ));
        lines.push(format!("  Discarded:         {}", self.discarded));
        lines.push(format!("  Stalled:           {}", self.stalled));
        lines.push(format!("  Transport errors:  {}", self.transport_errors));
        lines.push(format!("  Unresolved deps:   {}", self.unresolved));
        lines.push(format!("  Schema violations: {}", self.schema_violations));
        lines.push(format!("  Findings:          {}", self.findings));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = FuzzMetrics::default();
        let worker = metrics.clone();
        assert_eq!(worker.next_iteration(), 1);
        worker.record_committed();
        metrics.record_discarded();
        metrics.record_findings(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.iterations, 1);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.findings, 3);
        assert_eq!(snap.commit_rate(), 0.5);
        assert!(snap.format_report().contains("Committed:         1 (50.0%)"));
        assert_eq!(worker.snapshot(), snap);
    }
}
