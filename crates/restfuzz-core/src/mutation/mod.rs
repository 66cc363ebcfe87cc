//! Pairwise combinatorial mutation.
//!
//! Each endpoint owns a finite, restartable generator: the covering array over
//! its mutable fields' candidate domains, walked by a cursor. One `mutate` call
//! applies one row. When the cursor wraps the endpoint is marked exhausted,
//! which selection and termination read as a scheduling signal.
//!
//! # Architecture
//!
//! - [`candidates`]: mutable fields and their candidate values
//! - [`covering`]: greedy pairwise covering array construction

pub mod candidates;
pub mod covering;

use std::collections::HashMap;

use parking_lot::Mutex;
use restfuzz_types::schema;
use restfuzz_types::{
    BodyField, EndpointDescriptor, EndpointId, FieldRef, PathSeg, Request, SchemaViolation, Slot,
};
use serde_json::Value;
use tracing::debug;

use crate::synth::RequestSynthesizer;

pub use candidates::{collect_fields, Candidate, FieldDomain};
pub use covering::pairwise;

/// Result of one mutation step.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub request: Request,
    /// At least one applied value was outside the schema.
    pub out_of_schema: bool,
    /// Covering-array row applied, `None` when the endpoint has no mutable field.
    pub row: Option<usize>,
}

struct GeneratorState {
    fields: Vec<FieldRef>,
    domains: Vec<FieldDomain>,
    rows: Vec<Vec<usize>>,
    cursor: usize,
    exhausted: bool,
    sweeps: u64,
}

impl GeneratorState {
    fn new(domains: Vec<FieldDomain>) -> Self {
        let sizes: Vec<usize> = domains.iter().map(|d| d.candidates.len()).collect();
        Self {
            fields: domains.iter().map(|d| d.field.clone()).collect(),
            rows: pairwise(&sizes),
            domains,
            cursor: 0,
            exhausted: false,
            sweeps: 0,
        }
    }

    fn next_row(&mut self) -> Option<usize> {
        if self.rows.is_empty() {
            self.exhausted = true;
            return None;
        }
        let row = self.cursor;
        self.cursor += 1;
        if self.cursor >= self.rows.len() {
            self.cursor = 0;
            self.sweeps += 1;
            self.exhausted = true;
        }
        Some(row)
    }
}

/// Per-endpoint covering-array generators behind one lock.
pub struct MutationEngine {
    synth: RequestSynthesizer,
    allow_schema_violations: bool,
    states: Mutex<HashMap<EndpointId, GeneratorState>>,
}

impl MutationEngine {
    /// `synth` decides which absent optional fields are dependencies and
    /// therefore never toggled on.
    pub fn new(synth: RequestSynthesizer, allow_schema_violations: bool) -> Self {
        Self {
            synth,
            allow_schema_violations,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Apply the next uncovered assignment to `draft`.
    ///
    /// An endpoint with no mutable field returns the draft unchanged.
    pub fn mutate(&self, draft: &Request, endpoint: &EndpointDescriptor) -> Mutation {
        let domains = collect_fields(draft, endpoint, &self.synth, self.allow_schema_violations);
        let mut states = self.states.lock();
        let state = states
            .entry(draft.endpoint)
            .or_insert_with(|| GeneratorState::new(domains.clone()));
        let fields: Vec<FieldRef> = domains.iter().map(|d| d.field.clone()).collect();
        if state.fields != fields {
            debug!(endpoint = %draft.endpoint, "mutable fields changed, rebuilding covering array");
            *state = GeneratorState::new(domains);
        }

        let Some(row_idx) = state.next_row() else {
            return Mutation {
                request: draft.clone(),
                out_of_schema: false,
                row: None,
            };
        };

        let mut request = draft.clone();
        let mut out_of_schema = false;
        for (domain, &choice) in state.domains.iter().zip(&state.rows[row_idx]) {
            let Some(candidate) = domain.candidates.get(choice) else {
                continue;
            };
            out_of_schema |= candidate.out_of_schema;
            match &candidate.value {
                Some(v) => {
                    request.set_field(&domain.field, BodyField::value(v.clone()));
                }
                None => {
                    request.remove_field(&domain.field);
                }
            }
        }
        Mutation {
            request,
            out_of_schema,
            row: Some(row_idx),
        }
    }

    /// Whether the endpoint's covering array has been swept at least once.
    pub fn is_exhausted(&self, id: EndpointId) -> bool {
        self.states
            .lock()
            .get(&id)
            .map(|s| s.exhausted)
            .unwrap_or(false)
    }

    /// `(rows, completed sweeps)` of an endpoint's generator.
    pub fn progress(&self, id: EndpointId) -> Option<(usize, u64)> {
        self.states
            .lock()
            .get(&id)
            .map(|s| (s.rows.len(), s.sweeps))
    }
}

/// Check every concrete value of `request` against the endpoint's schemas.
///
/// Placeholders are skipped; they only become concrete at resolution.
pub fn check_request(request: &Request, endpoint: &EndpointDescriptor) -> Result<(), SchemaViolation> {
    for param in &endpoint.parameters {
        let (slot, field) = match param.location {
            restfuzz_types::ParamLocation::Path => (
                request.path_params.get(&param.name),
                FieldRef::Path(param.name.clone()),
            ),
            restfuzz_types::ParamLocation::Query => (
                request.query.get(&param.name),
                FieldRef::Query(param.name.clone()),
            ),
            restfuzz_types::ParamLocation::Header => (
                request.headers.get(&param.name),
                FieldRef::Header(param.name.clone()),
            ),
            restfuzz_types::ParamLocation::Body => continue,
        };
        if let Some(Slot::Concrete(v)) = slot {
            schema::validate(v, &param.schema, &field.label())?;
        }
    }
    if let (Some(body), Some(body_schema)) = (&request.body, &endpoint.request_body_schema) {
        check_body(body, body_schema, &mut Vec::new())?;
    }
    Ok(())
}

fn check_body(
    field: &BodyField,
    field_schema: &Value,
    path: &mut Vec<PathSeg>,
) -> Result<(), SchemaViolation> {
    let label = FieldRef::Body(path.clone()).label();
    match field {
        BodyField::Leaf(Slot::Concrete(v)) => schema::validate(v, field_schema, &label),
        BodyField::Leaf(Slot::Placeholder(_)) => Ok(()),
        BodyField::Object(fields) => {
            for name in schema::required(field_schema) {
                if !fields.contains_key(&name) {
                    return Err(SchemaViolation {
                        location: label,
                        reason: format!("missing required property '{name}'"),
                    });
                }
            }
            let props = schema::properties(field_schema);
            for (name, child) in fields {
                if let Some(child_schema) = props.and_then(|p| p.get(name)) {
                    path.push(PathSeg::Key(name.clone()));
                    check_body(child, child_schema, path)?;
                    path.pop();
                }
            }
            Ok(())
        }
        BodyField::Array(items) => {
            if let Some(item_schema) = schema::items(field_schema) {
                for (i, item) in items.iter().enumerate() {
                    path.push(PathSeg::Index(i));
                    check_body(item, item_schema, path)?;
                    path.pop();
                }
            }
            Ok(())
        }
    }
}
