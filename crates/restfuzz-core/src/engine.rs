//! Sequence extension loop.
//!
//! Each iteration walks `Start -> ChooseEndpoint -> Synthesize -> Resolve ->
//! Execute -> Feedback -> Judge` and ends `Committed`, `Discarded` or `Stalled`.
//! Workers run iterations concurrently on a [`JoinSet`]. The identifier table
//! and the corpus state are the shared mutable resources; both are touched
//! only under short-held locks and never across the network call.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use restfuzz_transport::{Transport, TransportError};
use restfuzz_types::{EndpointCatalog, EndpointId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::FuzzConfig;
use crate::corpus::{Corpus, InterestingnessGate, Step, TestCase, TestCaseId};
use crate::errors::FuzzError;
use crate::feedback::{
    calculate_response_diversity, calculate_tcl, CoverageTracker, ResponseSignature,
    SignatureHistory,
};
use crate::id_table::{extract_ids, DynamicIdTable, SuffixPredicate};
use crate::metrics::FuzzMetrics;
use crate::mutation::{check_request, MutationEngine};
use crate::oracle::{self, FindingLog};
use crate::report::{FuzzReport, LatencyProfile, OutcomeSummary, StopReason};
use crate::resolver::Resolver;
use crate::selection::EndpointSelector;
use crate::synth::RequestSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Committed,
    Discarded,
    Stalled,
}

/// How one iteration ended.
#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Committed {
        case: TestCaseId,
        step: Step,
    },
    Discarded {
        endpoint: EndpointId,
        /// Present when a response was obtained but judged redundant.
        step: Option<Step>,
        error: Option<FuzzError>,
    },
    Stalled {
        error: FuzzError,
    },
}

impl IterationOutcome {
    pub fn state(&self) -> TerminalState {
        match self {
            IterationOutcome::Committed { .. } => TerminalState::Committed,
            IterationOutcome::Discarded { .. } => TerminalState::Discarded,
            IterationOutcome::Stalled { .. } => TerminalState::Stalled,
        }
    }

    fn step(&self) -> Option<&Step> {
        match self {
            IterationOutcome::Committed { step, .. } => Some(step),
            IterationOutcome::Discarded { step, .. } => step.as_ref(),
            IterationOutcome::Stalled { .. } => None,
        }
    }

    fn error(&self) -> Option<&FuzzError> {
        match self {
            IterationOutcome::Committed { .. } => None,
            IterationOutcome::Discarded { error, .. } => error.as_ref(),
            IterationOutcome::Stalled { error } => Some(error),
        }
    }
}

/// One line of the iteration log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub timestamp: DateTime<Utc>,
    pub iteration: u64,
    pub worker: usize,
    pub state: TerminalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<TestCaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_as: Option<TestCaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Receives every finished iteration, e.g. to write a JSONL log.
pub trait IterationObserver: Send + Sync {
    fn on_iteration(&self, record: &IterationRecord);
}

struct CorpusState {
    corpus: Corpus,
    gate: InterestingnessGate,
    history: SignatureHistory,
    rng: StdRng,
    /// Next iteration starts from the empty base.
    force_seed: bool,
    /// Bases (`None` = empty base) that stalled since the last commit.
    stalled_bases: HashSet<Option<TestCaseId>>,
    last_commit: u64,
}

#[derive(Default)]
struct Observations {
    findings: FindingLog,
    latencies_ms: Vec<u64>,
    discard_reasons: std::collections::BTreeMap<String, u64>,
}

struct EngineInner {
    config: FuzzConfig,
    catalog: Arc<EndpointCatalog>,
    transport: Arc<dyn Transport>,
    synth: RequestSynthesizer,
    selector: EndpointSelector,
    resolver: Resolver,
    mutator: MutationEngine,
    table: RwLock<DynamicIdTable>,
    state: Mutex<CorpusState>,
    coverage: Mutex<CoverageTracker>,
    observations: Mutex<Observations>,
    metrics: FuzzMetrics,
    observer: Option<Arc<dyn IterationObserver>>,
    claimed: AtomicU64,
    consecutive_transport_failures: AtomicU64,
    stop: AtomicBool,
    stop_reason: Mutex<Option<StopReason>>,
}

/// Feedback-directed stateful fuzzer over an endpoint catalog.
#[derive(Clone)]
pub struct FuzzEngine {
    inner: Arc<EngineInner>,
}

impl FuzzEngine {
    pub fn new(
        catalog: Arc<EndpointCatalog>,
        transport: Arc<dyn Transport>,
        config: FuzzConfig,
    ) -> Self {
        let predicate = Arc::new(SuffixPredicate::for_catalog(&catalog));
        let synth = RequestSynthesizer::new(predicate);
        let resolver = Resolver::new(config.key_match, config.value_policy);
        let selector = EndpointSelector::new(Arc::clone(&catalog), &synth, resolver);
        let coverage = CoverageTracker::new(catalog.surface());
        let state = CorpusState {
            corpus: Corpus::new(),
            gate: InterestingnessGate::new(config.novelty_threshold),
            history: SignatureHistory::new(),
            rng: StdRng::seed_from_u64(config.seed),
            force_seed: false,
            stalled_bases: HashSet::new(),
            last_commit: 0,
        };
        Self {
            inner: Arc::new(EngineInner {
                mutator: MutationEngine::new(synth.clone(), config.allow_schema_violations),
                config,
                catalog,
                transport,
                synth,
                selector,
                resolver,
                table: RwLock::new(DynamicIdTable::new()),
                state: Mutex::new(state),
                coverage: Mutex::new(coverage),
                observations: Mutex::new(Observations::default()),
                metrics: FuzzMetrics::default(),
                observer: None,
                claimed: AtomicU64::new(0),
                consecutive_transport_failures: AtomicU64::new(0),
                stop: AtomicBool::new(false),
                stop_reason: Mutex::new(None),
            }),
        }
    }

    /// Attach an observer. Must be called before the engine is cloned or run.
    pub fn with_observer(mut self, observer: Arc<dyn IterationObserver>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.observer = Some(observer);
        } else {
            warn!("engine already shared, observer ignored");
        }
        self
    }

    pub fn metrics(&self) -> &FuzzMetrics {
        &self.inner.metrics
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.inner.config
    }

    /// Seed endpoints of the catalog.
    pub fn seeds(&self) -> Vec<EndpointId> {
        self.inner.selector.seeds()
    }

    pub fn corpus_len(&self) -> usize {
        self.inner.state.lock().corpus.len()
    }

    /// Copy of every committed sequence, in insertion order.
    pub fn corpus_snapshot(&self) -> Vec<TestCase> {
        self.inner
            .state
            .lock()
            .corpus
            .iter()
            .map(|c| TestCase::clone(c))
            .collect()
    }

    /// Copy of the identifier table.
    pub fn id_table(&self) -> DynamicIdTable {
        self.inner.table.read().clone()
    }

    /// Run one iteration on the calling task.
    pub async fn step(&self) -> IterationOutcome {
        let iteration = self.inner.claimed.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.run_iteration(iteration, 0).await
    }

    /// Run workers until a stop condition is reached.
    pub async fn run(&self) -> Result<FuzzReport> {
        self.inner.config.validate()?;
        let started_at = Utc::now();
        let start = Instant::now();
        let config = &self.inner.config;
        info!(
            base_url = self.inner.transport.name(),
            endpoints = self.inner.catalog.len(),
            seeds = self.inner.selector.seeds().len(),
            workers = config.workers,
            seed = config.seed,
            "starting fuzz run"
        );

        let mut workers = JoinSet::new();
        for worker in 0..config.workers {
            let inner = Arc::clone(&self.inner);
            workers.spawn(async move { inner.worker_loop(worker, start).await });
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "fuzz worker task failed");
            }
        }

        let report = self.report(started_at, start);
        info!(
            stop_reason = %report.stop_reason,
            iterations = report.metrics.iterations,
            corpus = report.corpus_size,
            findings = report.findings.len(),
            "fuzz run finished"
        );
        Ok(report)
    }

    fn report(&self, started_at: DateTime<Utc>, start: Instant) -> FuzzReport {
        let inner = &self.inner;
        let metrics = inner.metrics.snapshot();
        let stop_reason = (*inner.stop_reason.lock()).unwrap_or(StopReason::Iterations);
        let (corpus_size, longest_sequence) = {
            let state = inner.state.lock();
            let longest = state.corpus.iter().map(|c| c.len()).max().unwrap_or(0);
            (state.corpus.len(), longest)
        };
        let (findings, findings_by_category, latency, discard_reasons) = {
            let mut obs = inner.observations.lock();
            let latency = LatencyProfile::from_values(&mut obs.latencies_ms);
            (
                obs.findings.records(),
                obs.findings.by_category(),
                latency,
                obs.discard_reasons.clone(),
            )
        };
        FuzzReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            target: inner.transport.name().to_string(),
            seed: inner.config.seed,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            stop_reason,
            outcomes: OutcomeSummary {
                committed: metrics.committed,
                discarded: metrics.discarded,
                stalled: metrics.stalled,
                discard_reasons,
            },
            corpus_size,
            longest_sequence,
            id_keys: inner.table.read().len(),
            coverage: inner.coverage.lock().report(),
            latency,
            findings,
            findings_by_category,
            metrics,
        }
    }
}

impl EngineInner {
    async fn worker_loop(&self, worker: usize, start: Instant) {
        debug!(worker, "worker started");
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if let Some(budget) = self.config.time_budget() {
                if start.elapsed() >= budget {
                    self.request_stop(StopReason::Time);
                    break;
                }
            }
            let Some(iteration) = self.claim_iteration() else {
                self.request_stop(StopReason::Iterations);
                break;
            };
            let outcome = self.run_iteration(iteration, worker).await;
            if let Some(observer) = &self.observer {
                observer.on_iteration(&self.record(iteration, worker, &outcome));
            }
            if self.mutation_exhausted(iteration) {
                self.request_stop(StopReason::MutationExhausted);
            }
        }
        debug!(worker, "worker stopped");
    }

    fn claim_iteration(&self) -> Option<u64> {
        let max = self.config.max_iterations;
        self.claimed
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| match max {
                Some(m) if n >= m => None,
                _ => Some(n + 1),
            })
            .ok()
            .map(|prev| prev + 1)
    }

    fn request_stop(&self, reason: StopReason) {
        let mut slot = self.stop_reason.lock();
        if slot.is_none() {
            info!(reason = %reason, "stopping fuzz run");
            *slot = Some(reason);
        }
        self.stop.store(true, Ordering::Relaxed);
    }

    async fn run_iteration(&self, iteration: u64, worker: usize) -> IterationOutcome {
        self.metrics.next_iteration();
        let outcome = self.iterate(iteration).await;
        match &outcome {
            IterationOutcome::Committed { case, step } => {
                self.metrics.record_committed();
                debug!(
                    worker,
                    iteration,
                    case = %case,
                    request = %step.request.label(),
                    status = step.response.status,
                    tcl = step.tcl,
                    "committed"
                );
            }
            IterationOutcome::Discarded { endpoint, error, .. } => {
                self.metrics.record_discarded();
                let reason = error
                    .as_ref()
                    .map(|e| e.category())
                    .unwrap_or("not_interesting");
                *self
                    .observations
                    .lock()
                    .discard_reasons
                    .entry(reason.to_string())
                    .or_insert(0) += 1;
                debug!(worker, iteration, endpoint = %endpoint, reason, "discarded");
            }
            IterationOutcome::Stalled { error } => {
                self.metrics.record_stalled();
                debug!(worker, iteration, error = %error, "stalled");
            }
        }
        outcome
    }

    async fn iterate(&self, iteration: u64) -> IterationOutcome {
        // Start + ChooseEndpoint
        let (base, chosen) = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let base = if state.force_seed || state.corpus.is_empty() {
                state.force_seed = false;
                None
            } else {
                state.corpus.select(
                    &mut state.rng,
                    self.config.max_sequence_length,
                    self.config.exploration_rate,
                )
            };
            let base_endpoints = base.as_ref().map(|b| b.endpoints()).unwrap_or_default();
            let table = self.table.read();
            let chosen = self.selector.choose_compatible_endpoint(
                &base_endpoints,
                &table,
                |id| self.mutator.is_exhausted(id),
                &mut state.rng,
            );
            drop(table);

            let Some(chosen) = chosen else {
                let base_id = base.as_ref().map(|b| b.id);
                state.stalled_bases.insert(base_id);
                state.force_seed = base.is_some();
                if self.search_exhausted(state) {
                    self.request_stop(StopReason::SearchExhausted);
                }
                return IterationOutcome::Stalled {
                    error: FuzzError::StalledSelection {
                        base: base_id.map(|id| id.0),
                    },
                };
            };
            (base, chosen)
        };
        let endpoint_id = chosen;
        let Some(endpoint) = self.catalog.get(endpoint_id) else {
            return IterationOutcome::Stalled {
                error: FuzzError::StalledSelection { base: None },
            };
        };

        // Synthesize
        let draft = self.synth.build(endpoint_id, endpoint);
        let mutation = self.mutator.mutate(&draft, endpoint);
        if !mutation.out_of_schema {
            if let Err(violation) = check_request(&mutation.request, endpoint) {
                self.metrics.record_schema_violation();
                warn!(
                    endpoint = %endpoint.label(),
                    violation = %violation,
                    "synthesized request violates its schema"
                );
                return IterationOutcome::Discarded {
                    endpoint: endpoint_id,
                    step: None,
                    error: Some(FuzzError::Schema {
                        endpoint: endpoint_id,
                        violation,
                    }),
                };
            }
        }

        // Resolve
        let resolved = {
            let table = self.table.read();
            self.resolver.resolve(&mutation.request, &table)
        };
        let resolved = match resolved {
            Ok(r) => r,
            Err(e) => {
                self.metrics.record_unresolved();
                debug!(endpoint = %endpoint.label(), key = %e.key, "dependency not resolvable");
                return IterationOutcome::Discarded {
                    endpoint: endpoint_id,
                    step: None,
                    error: Some(e.into()),
                };
            }
        };

        // Execute
        let sent_at = Instant::now();
        let sent = tokio::time::timeout(
            self.config.request_timeout(),
            self.transport.send(&resolved),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));
        let response = match sent {
            Ok(r) => {
                self.consecutive_transport_failures
                    .store(0, Ordering::Relaxed);
                r
            }
            Err(e) => {
                self.note_transport_failure(&e);
                return IterationOutcome::Discarded {
                    endpoint: endpoint_id,
                    step: None,
                    error: Some(e.into()),
                };
            }
        };
        let latency_ms = sent_at.elapsed().as_millis() as u64;

        // Feedback
        if response.is_success() {
            let ids = extract_ids(&response.body, self.synth.predicate());
            if !ids.is_empty() {
                let added = self.table.write().update(ids);
                debug!(request = %resolved.label(), added, "identifier table updated");
            }
        }
        let tcl = calculate_tcl(&response);
        self.coverage.lock().record(&resolved, &response);
        let kinds = oracle::inspect(endpoint, &response);
        {
            let mut obs = self.observations.lock();
            obs.latencies_ms.push(latency_ms);
            if !kinds.is_empty() {
                self.metrics.record_findings(kinds.len() as u64);
                let first_seen = obs.findings.record(
                    endpoint_id,
                    endpoint,
                    kinds,
                    iteration,
                    &resolved.label(),
                    &response,
                );
                if first_seen > 0 {
                    info!(
                        request = %resolved.label(),
                        status = response.status,
                        new = first_seen,
                        "new finding"
                    );
                }
            }
        }

        // Judge
        let mut state = self.state.lock();
        let diversity = calculate_response_diversity(&response, &state.history);
        state.history.record(ResponseSignature::of(&response));
        let position = base.as_ref().map(|b| b.len()).unwrap_or(0);
        let step = Step {
            request: resolved,
            response,
            tcl,
            diversity,
        };
        if !state
            .gate
            .is_interesting(endpoint_id, position, tcl, diversity)
        {
            return IterationOutcome::Discarded {
                endpoint: endpoint_id,
                step: Some(step),
                error: None,
            };
        }
        let case = match &base {
            Some(b) => b.extend(step.clone()),
            None => TestCase::seed(step.clone()),
        };
        let id = state.corpus.insert(case);
        state.stalled_bases.clear();
        state.last_commit = iteration;
        IterationOutcome::Committed { case: id, step }
    }

    fn note_transport_failure(&self, error: &TransportError) {
        self.metrics.record_transport_error();
        let failures = self
            .consecutive_transport_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        debug!(error = %error, failures, "transport failure");
        let threshold = self.config.transport_failure_warn_threshold.max(1);
        if failures >= threshold {
            warn!(
                base_url = self.transport.name(),
                failures,
                last_error = %error,
                "target not responding; continuing"
            );
            self.consecutive_transport_failures
                .store(0, Ordering::Relaxed);
        }
    }

    /// The empty base and every extensible corpus entry stalled since the
    /// last commit.
    fn search_exhausted(&self, state: &CorpusState) -> bool {
        state.stalled_bases.contains(&None)
            && state
                .corpus
                .viable(self.config.max_sequence_length)
                .into_iter()
                .all(|id| state.stalled_bases.contains(&Some(id)))
    }

    /// Every endpoint reachable now has swept its covering array and nothing
    /// was committed for a stagnation window.
    fn mutation_exhausted(&self, iteration: u64) -> bool {
        let last_commit = self.state.lock().last_commit;
        if iteration.saturating_sub(last_commit) < self.config.stagnation_window {
            return false;
        }
        let reachable: BTreeSet<EndpointId> = {
            let table = self.table.read();
            self.selector
                .compatible(&table)
                .into_iter()
                .chain(self.selector.seeds())
                .collect()
        };
        !reachable.is_empty() && reachable.iter().all(|id| self.mutator.is_exhausted(*id))
    }

    fn record(&self, iteration: u64, worker: usize, outcome: &IterationOutcome) -> IterationRecord {
        let step = outcome.step();
        let endpoint = match outcome {
            IterationOutcome::Discarded { endpoint, .. } => self.catalog.get(*endpoint),
            _ => step.and_then(|s| self.catalog.get(s.request.endpoint)),
        };
        IterationRecord {
            timestamp: Utc::now(),
            iteration,
            worker,
            state: outcome.state(),
            base: match outcome {
                IterationOutcome::Committed { case, .. } => self
                    .state
                    .lock()
                    .corpus
                    .get(*case)
                    .and_then(|c| c.parent),
                _ => None,
            },
            endpoint: endpoint.map(|e| e.label()),
            request: step.map(|s| s.request.label()),
            status: step.map(|s| s.response.status),
            tcl: step.map(|s| s.tcl),
            diversity: step.map(|s| s.diversity),
            committed_as: match outcome {
                IterationOutcome::Committed { case, .. } => Some(*case),
                _ => None,
            },
            error: outcome.error().map(|e| e.to_string()),
        }
    }
}
