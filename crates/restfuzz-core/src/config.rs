//! Run configuration.
//!
//! Precedence is: built-in defaults, then a JSON config file, then
//! `RESTFUZZ_*` environment variables, then CLI flags (applied by the binary).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use restfuzz_types::{env_bool_or, env_var, env_var_or};
use serde::{Deserialize, Serialize};

use crate::id_table::{KeyMatch, ValuePolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// RNG seed; equal seeds with one worker replay the same decisions.
    pub seed: u64,
    /// Concurrent extension iterations.
    pub workers: usize,
    /// Iteration budget. `None` runs until another stop condition.
    pub max_iterations: Option<u64>,
    /// Wall-clock budget in seconds.
    pub time_budget_secs: Option<u64>,
    /// Per-request timeout; a timeout discards the iteration.
    pub request_timeout_ms: u64,
    /// Diversity above this admits a sequence regardless of TCL.
    pub novelty_threshold: f64,
    pub max_sequence_length: usize,
    /// Probability of a uniform base pick instead of the weighted one.
    pub exploration_rate: f64,
    pub key_match: KeyMatch,
    pub value_policy: ValuePolicy,
    /// Enables the wrong-type mutation class.
    pub allow_schema_violations: bool,
    /// Iterations without a commit before a fully mutation-exhausted run stops.
    pub stagnation_window: u64,
    /// Consecutive transport failures before a liveness warning.
    pub transport_failure_warn_threshold: u64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            workers: 4,
            max_iterations: Some(1000),
            time_budget_secs: None,
            request_timeout_ms: 10_000,
            novelty_threshold: 0.3,
            max_sequence_length: 8,
            exploration_rate: 0.1,
            key_match: KeyMatch::default(),
            value_policy: ValuePolicy::default(),
            allow_schema_violations: false,
            stagnation_window: 200,
            transport_failure_warn_threshold: 10,
        }
    }
}

impl FuzzConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Override fields set in the environment.
    pub fn apply_env(mut self) -> Self {
        self.seed = env_var_or("RESTFUZZ_SEED", self.seed);
        self.workers = env_var_or("RESTFUZZ_WORKERS", self.workers);
        if let Some(n) = env_var("RESTFUZZ_MAX_ITERATIONS") {
            self.max_iterations = Some(n);
        }
        if let Some(secs) = env_var("RESTFUZZ_TIME_BUDGET_SECS") {
            self.time_budget_secs = Some(secs);
        }
        self.request_timeout_ms = env_var_or("RESTFUZZ_TIMEOUT_MS", self.request_timeout_ms);
        self.novelty_threshold = env_var_or("RESTFUZZ_NOVELTY_THRESHOLD", self.novelty_threshold);
        self.max_sequence_length = env_var_or("RESTFUZZ_MAX_SEQUENCE_LENGTH", self.max_sequence_length);
        self.exploration_rate = env_var_or("RESTFUZZ_EXPLORATION_RATE", self.exploration_rate);
        self.allow_schema_violations =
            env_bool_or("RESTFUZZ_ALLOW_SCHEMA_VIOLATIONS", self.allow_schema_violations);
        self.stagnation_window = env_var_or("RESTFUZZ_STAGNATION_WINDOW", self.stagnation_window);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn with_time_budget(mut self, secs: u64) -> Self {
        self.time_budget_secs = Some(secs);
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_novelty_threshold(mut self, threshold: f64) -> Self {
        self.novelty_threshold = threshold;
        self
    }

    pub fn with_max_sequence_length(mut self, len: usize) -> Self {
        self.max_sequence_length = len;
        self
    }

    pub fn with_exploration_rate(mut self, rate: f64) -> Self {
        self.exploration_rate = rate;
        self
    }

    pub fn with_key_match(mut self, key_match: KeyMatch) -> Self {
        self.key_match = key_match;
        self
    }

    pub fn with_value_policy(mut self, policy: ValuePolicy) -> Self {
        self.value_policy = policy;
        self
    }

    pub fn with_schema_violations(mut self, allow: bool) -> Self {
        self.allow_schema_violations = allow;
        self
    }

    pub fn with_stagnation_window(mut self, window: u64) -> Self {
        self.stagnation_window = window;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.max_sequence_length == 0 {
            anyhow::bail!("max_sequence_length must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            anyhow::bail!(
                "exploration_rate must be within [0, 1], got {}",
                self.exploration_rate
            );
        }
        if self.max_iterations.is_none() && self.time_budget_secs.is_none() {
            tracing::warn!("no iteration or time budget; run stops only on exhaustion");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FuzzConfig::default();
        assert_eq!(config.max_sequence_length, 8);
        assert_eq!(config.novelty_threshold, 0.3);
        assert_eq!(config.exploration_rate, 0.1);
        assert_eq!(config.key_match, KeyMatch::Relaxed);
        assert!(!config.allow_schema_violations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"workers": 2, "key_match": "exact", "value_policy": {{"policy": "any", "seed": 7}}}}"#
        )
        .unwrap();
        let config = FuzzConfig::from_path(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.key_match, KeyMatch::Exact);
        assert_eq!(config.value_policy, ValuePolicy::Any { seed: 7 });
        assert_eq!(config.max_sequence_length, 8);
    }

    #[test]
    fn test_invalid_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = FuzzConfig::from_path(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(FuzzConfig::default().with_workers(0).validate().is_err());
        assert!(FuzzConfig::default().with_exploration_rate(1.5).validate().is_err());
        assert!(FuzzConfig::default().with_max_sequence_length(0).validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("RESTFUZZ_STAGNATION_WINDOW", "17");
        let config = FuzzConfig::from_env();
        std::env::remove_var("RESTFUZZ_STAGNATION_WINDOW");
        assert_eq!(config.stagnation_window, 17);
    }
}
