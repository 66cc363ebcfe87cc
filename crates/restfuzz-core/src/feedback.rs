//! Feedback signals computed from observable responses only.
//!
//! - [`calculate_tcl`]: integer proxy for server-side code paths exercised
//! - [`calculate_response_diversity`]: distance to the nearest signature seen so far
//! - [`CoverageTracker`]: cumulative coverage of the catalog surface

use std::collections::{BTreeSet, HashSet};

use restfuzz_types::{ApiSurface, BodyField, Request, Response, JSON_CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Weight of the status tier; larger than any shape or size contribution.
const TIER_WEIGHT: u32 = 32;
const MAX_FIELD_SCORE: u32 = 16;
const MAX_SIZE_BUCKET: u32 = 8;
/// Distance reported when nothing has been seen yet.
pub const MAX_DIVERSITY: f64 = 2.5;
/// Keys whose short string values identify an error kind.
const ERROR_KIND_KEYS: [&str; 7] = ["code", "error", "error_code", "errorCode", "type", "title", "status"];
const MAX_ERROR_TOKEN_LEN: usize = 40;

/// Rank of a status class: server errors and successes reach deeper code than
/// validation rejections.
fn status_tier(status: u16) -> u32 {
    match status {
        500..=599 => 4,
        200..=299 => 3,
        400..=499 => 2,
        _ => 1,
    }
}

fn top_level_fields(body: &Value) -> usize {
    match body {
        Value::Object(fields) => fields.len(),
        Value::Array(items) => items.first().map(top_level_fields).unwrap_or(0),
        _ => 0,
    }
}

fn size_bucket(len: usize) -> u32 {
    if len == 0 {
        return 0;
    }
    let bits = usize::BITS - len.leading_zeros();
    ((bits + 1) / 2).min(MAX_SIZE_BUCKET)
}

/// Test Coverage Level of one response: status tier, shape breadth and size bucket.
pub fn calculate_tcl(response: &Response) -> u32 {
    status_tier(response.status) * TIER_WEIGHT
        + (top_level_fields(&response.body) as u32).min(MAX_FIELD_SCORE)
        + size_bucket(response.body_len)
}

/// What a response looks like, independent of its concrete values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseSignature {
    pub status: u16,
    /// Flattened `path:type` entries; array indices collapse to `[]`.
    pub shape: BTreeSet<String>,
    /// `key=value` tokens of short error-kind fields, empty for non-errors.
    pub error_kind: BTreeSet<String>,
}

impl ResponseSignature {
    pub fn of(response: &Response) -> Self {
        let mut shape = BTreeSet::new();
        flatten_shape(&response.body, "$", &mut shape);
        let error_kind = if response.status >= 400 {
            error_tokens(&response.body)
        } else {
            BTreeSet::new()
        };
        Self {
            status: response.status,
            shape,
            error_kind,
        }
    }

    /// Status difference (0, 0.5 same class, 1) + shape Jaccard distance +
    /// half the error-kind Jaccard distance when both are errors.
    pub fn distance(&self, other: &ResponseSignature) -> f64 {
        let status = if self.status == other.status {
            0.0
        } else if self.status / 100 == other.status / 100 {
            0.5
        } else {
            1.0
        };
        let error = if self.status >= 400 && other.status >= 400 {
            0.5 * jaccard_distance(&self.error_kind, &other.error_kind)
        } else {
            0.0
        };
        status + jaccard_distance(&self.shape, &other.shape) + error
    }
}

fn flatten_shape(value: &Value, path: &str, out: &mut BTreeSet<String>) {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    out.insert(format!("{path}:{kind}"));
    match value {
        Value::Object(fields) => {
            for (k, v) in fields {
                flatten_shape(v, &format!("{path}.{k}"), out);
            }
        }
        Value::Array(items) => {
            let child = format!("{path}[]");
            for item in items {
                flatten_shape(item, &child, out);
            }
        }
        _ => {}
    }
}

fn error_tokens(body: &Value) -> BTreeSet<String> {
    let Value::Object(fields) = body else {
        return BTreeSet::new();
    };
    fields
        .iter()
        .filter(|(k, _)| ERROR_KIND_KEYS.contains(&k.as_str()))
        .filter_map(|(k, v)| match v {
            Value::String(s) if s.len() <= MAX_ERROR_TOKEN_LEN => Some(format!("{k}={s}")),
            Value::Number(n) => Some(format!("{k}={n}")),
            _ => None,
        })
        .collect()
}

fn jaccard_distance(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    1.0 - a.intersection(b).count() as f64 / union as f64
}

/// Every distinct response signature observed in the run.
#[derive(Debug, Clone, Default)]
pub struct SignatureHistory {
    seen: HashSet<ResponseSignature>,
    ordered: Vec<ResponseSignature>,
}

impl SignatureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the signature was new.
    pub fn record(&mut self, signature: ResponseSignature) -> bool {
        if self.seen.contains(&signature) {
            return false;
        }
        self.seen.insert(signature.clone());
        self.ordered.push(signature);
        true
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn nearest_distance(&self, signature: &ResponseSignature) -> f64 {
        if self.seen.contains(signature) {
            return 0.0;
        }
        self.ordered
            .iter()
            .map(|s| signature.distance(s))
            .fold(MAX_DIVERSITY, f64::min)
    }
}

/// Distance from `response` to the nearest signature in `history`.
pub fn calculate_response_diversity(response: &Response, history: &SignatureHistory) -> f64 {
    history.nearest_distance(&ResponseSignature::of(response))
}

/// Hit/total pair of one coverage dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratio {
    pub hit: usize,
    pub total: usize,
}

impl Ratio {
    fn of(hit: &BTreeSet<impl Ord>, total: usize) -> Self {
        Self {
            hit: hit.len(),
            total,
        }
    }

    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.hit as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Cumulative coverage against the catalog surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub paths: Ratio,
    pub operations: Ratio,
    pub parameters: Ratio,
    pub statuses: Ratio,
    pub response_fields: Ratio,
    #[serde(default)]
    pub input_content_types: Ratio,
    /// Sum of the per-dimension ratios.
    pub score: f64,
}

/// Tracks which parts of the API surface have been exercised.
///
/// Only items that exist in the surface are counted, so ratios stay within 1.
#[derive(Debug, Clone)]
pub struct CoverageTracker {
    surface: ApiSurface,
    exercised: ApiSurface,
}

impl CoverageTracker {
    pub fn new(surface: ApiSurface) -> Self {
        Self {
            surface,
            exercised: ApiSurface::default(),
        }
    }

    pub fn record(&mut self, request: &Request, response: &Response) {
        let s = &self.surface;
        let e = &mut self.exercised;
        if s.paths.contains(&request.template) {
            e.paths.insert(request.template.clone());
        }
        let op = (request.method, request.template.clone());
        if s.operations.contains(&op) {
            e.operations.insert(op);
        }
        let mut names: Vec<&String> = request
            .path_params
            .keys()
            .chain(request.query.keys())
            .chain(request.headers.keys())
            .collect();
        if let Some(BodyField::Object(fields)) = &request.body {
            names.extend(fields.keys());
        }
        for name in names {
            if s.parameters.contains(name) {
                e.parameters.insert(name.clone());
            }
        }
        if request.body.is_some() {
            let sent = (
                request.method,
                request.template.clone(),
                JSON_CONTENT_TYPE.to_string(),
            );
            if s.input_content_types.contains(&sent) {
                e.input_content_types.insert(sent);
            }
        }
        if s.statuses.contains(&response.status) {
            e.statuses.insert(response.status);
        }
        let object = match &response.body {
            Value::Array(items) => items.first(),
            other => Some(other),
        };
        if let Some(Value::Object(fields)) = object {
            for key in fields.keys() {
                if s.response_fields.contains(key) {
                    e.response_fields.insert(key.clone());
                }
            }
        }
    }

    pub fn report(&self) -> CoverageReport {
        let s = &self.surface;
        let e = &self.exercised;
        let mut report = CoverageReport {
            paths: Ratio::of(&e.paths, s.paths.len()),
            operations: Ratio::of(&e.operations, s.operations.len()),
            parameters: Ratio::of(&e.parameters, s.parameters.len()),
            statuses: Ratio::of(&e.statuses, s.statuses.len()),
            response_fields: Ratio::of(&e.response_fields, s.response_fields.len()),
            input_content_types: Ratio::of(
                &e.input_content_types,
                s.input_content_types.len(),
            ),
            score: 0.0,
        };
        report.score = [
            report.paths,
            report.operations,
            report.parameters,
            report.statuses,
            report.response_fields,
            report.input_content_types,
        ]
        .iter()
        .map(Ratio::value)
        .sum();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restfuzz_types::{EndpointCatalog, EndpointDescriptor, EndpointId, HttpMethod};
    use serde_json::json;

    #[test]
    fn test_tcl_orders_by_status_tier() {
        let ok = Response::json(200, json!({"id": 1}));
        let bad = Response::json(400, json!({"id": 1}));
        let crash = Response::json(500, json!({"id": 1}));
        assert!(calculate_tcl(&crash) > calculate_tcl(&ok));
        assert!(calculate_tcl(&ok) > calculate_tcl(&bad));
    }

    #[test]
    fn test_tcl_grows_with_shape_and_size() {
        let small = Response::json(200, json!({"a": 1}));
        let wide = Response::json(200, json!({"a": 1, "b": 2, "c": "x".repeat(200)}));
        assert!(calculate_tcl(&wide) > calculate_tcl(&small));
        assert_eq!(calculate_tcl(&Response::json(204, Value::Null)), 3 * TIER_WEIGHT);
    }

    #[test]
    fn test_identical_shape_has_zero_diversity() {
        let mut history = SignatureHistory::new();
        let first = Response::json(200, json!({"userId": "u1", "name": "a"}));
        assert_eq!(calculate_response_diversity(&first, &history), MAX_DIVERSITY);
        history.record(ResponseSignature::of(&first));

        let second = Response::json(200, json!({"userId": "u2", "name": "b"}));
        assert_eq!(calculate_response_diversity(&second, &history), 0.0);
    }

    #[test]
    fn test_diversity_reflects_novelty() {
        let mut history = SignatureHistory::new();
        history.record(ResponseSignature::of(&Response::json(200, json!({"a": 1}))));
        let same_class = Response::json(201, json!({"a": 1}));
        let new_shape = Response::json(200, json!({"b": [1, 2]}));
        let error = Response::json(500, json!({"error": "boom"}));
        let d1 = calculate_response_diversity(&same_class, &history);
        let d2 = calculate_response_diversity(&new_shape, &history);
        let d3 = calculate_response_diversity(&error, &history);
        assert!((d1 - 0.5).abs() < 1e-9);
        assert!(d2 > 0.5 && d2 <= 1.0);
        assert!(d3 > d2);
    }

    #[test]
    fn test_array_items_collapse_in_shape() {
        let a = ResponseSignature::of(&Response::json(200, json!([{"id": 1}, {"id": 2}])));
        let b = ResponseSignature::of(&Response::json(200, json!([{"id": 3}])));
        assert_eq!(a, b);
    }

    #[test]
    fn test_error_kind_distinguishes_errors() {
        let a = ResponseSignature::of(&Response::json(400, json!({"code": "E_NAME"})));
        let b = ResponseSignature::of(&Response::json(400, json!({"code": "E_AGE"})));
        assert!((a.distance(&b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_tracker() {
        let catalog = EndpointCatalog::new(vec![
            EndpointDescriptor::new(HttpMethod::Post, "/users")
                .with_response(json!({"properties": {"userId": {}, "name": {}}}))
                .with_statuses(&[201, 400]),
            EndpointDescriptor::new(HttpMethod::Get, "/pets").with_statuses(&[200]),
        ]);
        let mut tracker = CoverageTracker::new(catalog.surface());
        let req = Request::new(EndpointId(0), HttpMethod::Post, "/users");
        tracker.record(&req, &Response::json(201, json!({"userId": "u1", "extra": 1})));
        tracker.record(&req, &Response::json(418, json!({})));

        let report = tracker.report();
        assert_eq!(report.paths, Ratio { hit: 1, total: 2 });
        assert_eq!(report.statuses, Ratio { hit: 1, total: 3 });
        assert_eq!(report.response_fields, Ratio { hit: 1, total: 2 });
        let expected = 0.5 + 0.5 + 0.0 + 1.0 / 3.0 + 0.5;
        assert!((report.score - expected).abs() < 1e-9);
        assert_eq!(report.input_content_types, Ratio::default());
    }

    #[test]
    fn test_input_content_types_counted_for_sent_bodies() {
        let catalog = EndpointCatalog::new(vec![
            EndpointDescriptor::new(HttpMethod::Post, "/users")
                .with_body(json!({"type": "object", "properties": {"name": {}}})),
            EndpointDescriptor::new(HttpMethod::Put, "/avatars")
                .with_body(json!({"type": "object"}))
                .with_content_types(&["application/json", "multipart/form-data"]),
        ]);
        let mut tracker = CoverageTracker::new(catalog.surface());
        assert_eq!(tracker.report().input_content_types, Ratio { hit: 0, total: 3 });

        let bodyless = Request::new(EndpointId(0), HttpMethod::Post, "/users");
        tracker.record(&bodyless, &Response::json(400, json!({})));
        assert_eq!(tracker.report().input_content_types.hit, 0);

        let mut with_body = Request::new(EndpointId(1), HttpMethod::Put, "/avatars");
        with_body.body = Some(BodyField::Object(Default::default()));
        tracker.record(&with_body, &Response::json(200, json!({})));
        let report = tracker.report();
        assert_eq!(report.input_content_types, Ratio { hit: 1, total: 3 });
    }
}
