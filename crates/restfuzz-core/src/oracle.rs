//! Response oracle: flags responses that look like bugs.

use std::collections::BTreeMap;

use restfuzz_types::{EndpointDescriptor, EndpointId, HttpMethod, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body fragments that betray a leaked stack trace.
const STACK_TRACE_PATTERNS: [&str; 8] = [
    "Traceback (most recent call last)",
    "Exception in thread",
    "at java.",
    "at org.",
    "panicked at",
    "node_modules/",
    "stack trace",
    "NullPointerException",
];

/// Statuses allowed to carry no body.
const BODYLESS_STATUSES: [u16; 3] = [204, 205, 304];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FindingKind {
    UndeclaredStatus { status: u16 },
    ServerError { status: u16 },
    StackTrace,
    EmptyBody { status: u16 },
    UnexpectedContentType { content_type: String },
}

impl FindingKind {
    pub fn category(&self) -> &'static str {
        match self {
            FindingKind::UndeclaredStatus { .. } => "undeclared_status",
            FindingKind::ServerError { .. } => "server_error",
            FindingKind::StackTrace => "stack_trace",
            FindingKind::EmptyBody { .. } => "empty_body",
            FindingKind::UnexpectedContentType { .. } => "unexpected_content_type",
        }
    }
}

/// Inspect one response of `endpoint`.
pub fn inspect(endpoint: &EndpointDescriptor, response: &Response) -> Vec<FindingKind> {
    let mut findings = Vec::new();
    let status = response.status;

    if !endpoint.declared_statuses.is_empty() && !endpoint.declared_statuses.contains(&status) {
        findings.push(FindingKind::UndeclaredStatus { status });
    }
    if (500..600).contains(&status) {
        findings.push(FindingKind::ServerError { status });
    }
    if let Value::String(text) = &response.body {
        if STACK_TRACE_PATTERNS.iter().any(|p| text.contains(p)) {
            findings.push(FindingKind::StackTrace);
        }
    } else if response.body_len > 0 {
        let text = response.body.to_string();
        if STACK_TRACE_PATTERNS.iter().any(|p| text.contains(p)) {
            findings.push(FindingKind::StackTrace);
        }
    }
    // a body is expected unless the status forbids one or the server
    // declared a non-JSON media type
    let expects_body = response
        .content_type()
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(true);
    if response.body_len == 0
        && !BODYLESS_STATUSES.contains(&status)
        && endpoint.method != HttpMethod::Head
        && expects_body
    {
        findings.push(FindingKind::EmptyBody { status });
    }
    if response.is_success() && response.body_len > 0 {
        if let Some(ct) = response.content_type() {
            if !ct.to_ascii_lowercase().contains("json") {
                findings.push(FindingKind::UnexpectedContentType {
                    content_type: ct.to_string(),
                });
            }
        }
    }
    findings
}

/// First occurrence of a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSample {
    pub iteration: u64,
    pub request: String,
    pub status: u16,
    /// Truncated response body.
    pub body_excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    pub endpoint: String,
    pub kind: FindingKind,
    pub count: u64,
    pub sample: FindingSample,
}

/// Findings grouped by `(kind, endpoint)`.
#[derive(Debug, Clone, Default)]
pub struct FindingLog {
    records: BTreeMap<(FindingKind, EndpointId), FindingRecord>,
}

impl FindingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many findings were first occurrences.
    pub fn record(
        &mut self,
        endpoint_id: EndpointId,
        endpoint: &EndpointDescriptor,
        kinds: Vec<FindingKind>,
        iteration: u64,
        request_label: &str,
        response: &Response,
    ) -> usize {
        let mut new = 0;
        for kind in kinds {
            let record = self
                .records
                .entry((kind.clone(), endpoint_id))
                .or_insert_with(|| {
                    new += 1;
                    FindingRecord {
                        endpoint: endpoint.label(),
                        kind,
                        count: 0,
                        sample: FindingSample {
                            iteration,
                            request: request_label.to_string(),
                            status: response.status,
                            body_excerpt: truncate(&response.body.to_string(), 200),
                        },
                    }
                });
            record.count += 1;
        }
        new
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by count, most frequent first.
    pub fn records(&self) -> Vec<FindingRecord> {
        let mut out: Vec<FindingRecord> = self.records.values().cloned().collect();
        out.sort_by(|a, b| b.count.cmp(&a.count));
        out
    }

    /// Count per category.
    pub fn by_category(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for record in self.records.values() {
            *out.entry(record.kind.category().to_string()).or_insert(0) += record.count;
        }
        out
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
