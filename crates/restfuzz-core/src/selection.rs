//! Endpoint compatibility selection.
//!
//! Each endpoint's dependency keys are the placeholder keys of its draft; they
//! are computed once per run since the synthesizer is deterministic.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::Rng;
use restfuzz_types::{EndpointCatalog, EndpointDescriptor, EndpointId};

use crate::id_table::DynamicIdTable;
use crate::resolver::Resolver;
use crate::synth::RequestSynthesizer;

pub struct EndpointSelector {
    catalog: Arc<EndpointCatalog>,
    dependencies: Vec<BTreeSet<String>>,
    resolver: Resolver,
}

impl EndpointSelector {
    pub fn new(catalog: Arc<EndpointCatalog>, synth: &RequestSynthesizer, resolver: Resolver) -> Self {
        let dependencies = catalog
            .iter()
            .map(|(id, ep)| synth.build(id, ep).placeholder_keys())
            .collect();
        Self {
            catalog,
            dependencies,
            resolver,
        }
    }

    pub fn dependencies(&self, id: EndpointId) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.dependencies.get(id.0).unwrap_or(&EMPTY)
    }

    /// Invocable with an empty identifier table.
    pub fn is_seed_endpoint(&self, id: EndpointId) -> bool {
        self.dependencies(id).is_empty()
    }

    pub fn seeds(&self) -> Vec<EndpointId> {
        self.catalog
            .iter()
            .map(|(id, _)| id)
            .filter(|id| self.is_seed_endpoint(*id))
            .collect()
    }

    /// Endpoints whose dependencies all resolve against `table`.
    pub fn compatible(&self, table: &DynamicIdTable) -> Vec<EndpointId> {
        self.catalog
            .iter()
            .map(|(id, _)| id)
            .filter(|id| self.resolver.can_resolve(self.dependencies(*id), table))
            .collect()
    }

    /// Pick the next endpoint to append to a base sequence.
    ///
    /// An empty `base` only considers seed endpoints. Candidates are ranked by:
    /// not yet in `base`, not mutation-exhausted, relation to the base's last
    /// endpoint, then a random tie-break.
    pub fn choose_compatible_endpoint<R: Rng>(
        &self,
        base: &[EndpointId],
        table: &DynamicIdTable,
        is_exhausted: impl Fn(EndpointId) -> bool,
        rng: &mut R,
    ) -> Option<EndpointId> {
        let candidates: Vec<EndpointId> = if base.is_empty() {
            self.seeds()
        } else {
            self.compatible(table)
        };
        let last = base.last().and_then(|id| self.catalog.get(*id));

        let ranked: Vec<(EndpointId, (bool, bool, u32))> = candidates
            .into_iter()
            .filter_map(|id| {
                let ep = self.catalog.get(id)?;
                let rank = (
                    !base.contains(&id),
                    !is_exhausted(id),
                    last.map(|l| relation_score(l, ep)).unwrap_or(0),
                );
                Some((id, rank))
            })
            .collect();

        let best = ranked.iter().map(|(_, r)| *r).max()?;
        let top: Vec<EndpointId> = ranked
            .into_iter()
            .filter(|(_, r)| *r == best)
            .map(|(id, _)| id)
            .collect();
        Some(top[rng.gen_range(0..top.len())])
    }
}

/// Same path +3, sub-path +2, same resource root +1, different method +1.
pub fn relation_score(last: &EndpointDescriptor, candidate: &EndpointDescriptor) -> u32 {
    let mut score = 0;
    let (a, b) = (
        last.path.trim_end_matches('/'),
        candidate.path.trim_end_matches('/'),
    );
    if a == b {
        score += 3;
    } else if b.starts_with(&format!("{a}/")) || a.starts_with(&format!("{b}/")) {
        score += 2;
    }
    if last.resource_root().is_some() && last.resource_root() == candidate.resource_root() {
        score += 1;
    }
    if last.method != candidate.method {
        score += 1;
    }
    score
}
