//! Corpus of interesting test sequences and its scheduler.
//!
//! Test cases live in an append-only arena addressed by [`TestCaseId`]; the
//! scheduling weights (`times_selected`) are kept in a separate index so that
//! selecting never touches a stored sequence. Extension always builds a new
//! [`TestCase`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use restfuzz_types::{EndpointId, Request, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Floor weight so zero-TCL sequences can still be picked.
const MIN_WEIGHT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestCaseId(pub u64);

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tc-{}", self.0)
    }
}

/// One executed request and its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub request: Request,
    pub response: Response,
    pub tcl: u32,
    pub diversity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub parent: Option<TestCaseId>,
    /// Corpus-wide insertion counter at commit time.
    pub generation: u64,
    pub steps: Vec<Step>,
    /// Cumulative TCL over all steps.
    pub tcl: u64,
    /// Diversity score of the last step.
    pub diversity: f64,
    /// SHA-256 over the `(method, template)` sequence.
    pub fingerprint: String,
}

impl TestCase {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.steps.iter().map(|s| s.request.endpoint).collect()
    }

    /// A new case with `step` appended. `self` is not modified.
    pub fn extend(&self, step: Step) -> TestCase {
        let mut steps = self.steps.clone();
        let tcl = self.tcl + u64::from(step.tcl);
        let diversity = step.diversity;
        steps.push(step);
        TestCase {
            id: self.id,
            parent: Some(self.id),
            generation: self.generation,
            fingerprint: sequence_fingerprint(&steps),
            steps,
            tcl,
            diversity,
        }
    }

    /// The first step of a fresh sequence.
    pub fn seed(step: Step) -> TestCase {
        let steps = vec![step];
        TestCase {
            id: TestCaseId(0),
            parent: None,
            generation: 0,
            tcl: u64::from(steps[0].tcl),
            diversity: steps[0].diversity,
            fingerprint: sequence_fingerprint(&steps),
            steps,
        }
    }

    /// `POST /users -> GET /users/{userId}` style summary.
    pub fn summary(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("{} {}", s.request.method, s.request.template))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

pub fn sequence_fingerprint(steps: &[Step]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.request.method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(step.request.template.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Append-only arena plus scheduling index.
#[derive(Debug, Default)]
pub struct Corpus {
    cases: Vec<Arc<TestCase>>,
    times_selected: Vec<u64>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a case, assigning its id and generation.
    pub fn insert(&mut self, mut case: TestCase) -> TestCaseId {
        let id = TestCaseId(self.cases.len() as u64);
        case.id = id;
        case.generation = self.cases.len() as u64 + 1;
        self.cases.push(Arc::new(case));
        self.times_selected.push(0);
        id
    }

    pub fn get(&self, id: TestCaseId) -> Option<Arc<TestCase>> {
        self.cases.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestCase>> {
        self.cases.iter()
    }

    pub fn times_selected(&self, id: TestCaseId) -> u64 {
        self.times_selected.get(id.0 as usize).copied().unwrap_or(0)
    }

    /// Ids of cases short enough to extend.
    pub fn viable(&self, max_len: usize) -> Vec<TestCaseId> {
        self.cases
            .iter()
            .filter(|c| c.len() < max_len)
            .map(|c| c.id)
            .collect()
    }

    fn weight(&self, idx: usize) -> f64 {
        let tcl = self.cases[idx].tcl as f64;
        (tcl / (1.0 + self.times_selected[idx] as f64)).max(MIN_WEIGHT)
    }

    /// Weighted-random pick with weight `tcl / (1 + times_selected)`.
    ///
    /// With probability `exploration_rate` the pick is uniform instead. Cases
    /// at `max_len` are skipped. Increments the pick's `times_selected`.
    pub fn select<R: Rng>(
        &mut self,
        rng: &mut R,
        max_len: usize,
        exploration_rate: f64,
    ) -> Option<Arc<TestCase>> {
        let viable: Vec<usize> = (0..self.cases.len())
            .filter(|&i| self.cases[i].len() < max_len)
            .collect();
        if viable.is_empty() {
            return None;
        }

        let chosen = if rng.gen::<f64>() < exploration_rate {
            viable[rng.gen_range(0..viable.len())]
        } else {
            let total: f64 = viable.iter().map(|&i| self.weight(i)).sum();
            let mut point = rng.gen::<f64>() * total;
            let mut chosen = viable[viable.len() - 1];
            for &i in &viable {
                let w = self.weight(i);
                if point < w {
                    chosen = i;
                    break;
                }
                point -= w;
            }
            chosen
        };
        self.times_selected[chosen] += 1;
        Some(Arc::clone(&self.cases[chosen]))
    }
}

/// Admission gate: a new best TCL for an (endpoint, position) or enough novelty.
#[derive(Debug, Clone)]
pub struct InterestingnessGate {
    novelty_threshold: f64,
    best: HashMap<(EndpointId, usize), u32>,
}

impl InterestingnessGate {
    pub fn new(novelty_threshold: f64) -> Self {
        Self {
            novelty_threshold,
            best: HashMap::new(),
        }
    }

    /// Raises the recorded maximum when `tcl` beats it.
    pub fn is_interesting(
        &mut self,
        endpoint: EndpointId,
        position: usize,
        tcl: u32,
        diversity: f64,
    ) -> bool {
        let best = self.best.entry((endpoint, position)).or_insert(0);
        let new_best = tcl > *best;
        if new_best {
            *best = tcl;
        }
        new_best || diversity > self.novelty_threshold
    }

    pub fn best(&self, endpoint: EndpointId, position: usize) -> Option<u32> {
        self.best.get(&(endpoint, position)).copied()
    }
}
