//! Blocking HTTP transport over `ureq`.
//!
//! `ureq` is synchronous, so each send runs on the tokio blocking pool. The
//! agent is cheap to clone (it shares one connection pool internally).
//!
//! Static headers such as `Authorization` are applied to every request. A
//! `401`/`403` answer is retried exactly once with those headers re-applied.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use base64::Engine;
use restfuzz_types::{env_var_or, Request, Response, JSON_CONTENT_TYPE};
use tracing::debug;

use crate::{Transport, TransportError};

/// Upper bound on a response body we are willing to buffer.
const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Create a transport using `RESTFUZZ_HTTP_TIMEOUT_SECS` and
    /// `RESTFUZZ_HTTP_CONNECT_TIMEOUT_SECS`, falling back to 30s / 10s.
    pub fn new(base_url: &str) -> Self {
        let timeout = Duration::from_secs(env_var_or(
            "RESTFUZZ_HTTP_TIMEOUT_SECS",
            Self::DEFAULT_TIMEOUT_SECS,
        ));
        let connect = Duration::from_secs(env_var_or(
            "RESTFUZZ_HTTP_CONNECT_TIMEOUT_SECS",
            Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        ));
        Self::with_timeouts(base_url, timeout, connect)
    }

    pub fn with_timeouts(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .timeout_connect(connect_timeout)
                .build(),
            headers: Vec::new(),
        }
    }

    /// Add a static header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse and add `Name: value` headers, ignoring malformed entries.
    pub fn with_header_lines<'a>(mut self, lines: impl IntoIterator<Item = &'a str>) -> Self {
        for line in lines {
            if let Some((name, value)) = parse_header_line(line) {
                self.headers.push((name, value));
            }
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send_blocking(&self, request: &Request) -> Result<Response, TransportError> {
        let response = self.send_once(request)?;
        if matches!(response.status, 401 | 403) && !self.headers.is_empty() {
            debug!(
                status = response.status,
                path = %request.path,
                "auth rejected, retrying once"
            );
            return self.send_once(request);
        }
        Ok(response)
    }

    fn send_once(&self, request: &Request) -> Result<Response, TransportError> {
        let path = request.render_path().map_err(TransportError::Unresolved)?;
        let url = format!("{}{}", self.base_url, path);

        let mut call = self.agent.request(request.method.as_str(), &url);
        for (name, value) in request.query_pairs() {
            call = call.query(&name, &value);
        }
        for (name, value) in request.header_pairs() {
            call = call.set(&name, &value);
        }
        for (name, value) in &self.headers {
            call = call.set(name, value);
        }

        let result = match request.body_json().map_err(TransportError::Unresolved)? {
            Some(body) => call
                .set("Content-Type", JSON_CONTENT_TYPE)
                .send_string(&body.to_string()),
            None => call.call(),
        };

        let raw = match result {
            Ok(resp) => resp,
            // Non-2xx statuses are ordinary responses here.
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(t)) => {
                let msg = t.to_string();
                if msg.contains("timed out") {
                    return Err(TransportError::Timeout);
                }
                return Err(TransportError::Connect(msg));
            }
        };
        read_response(raw)
    }
}

fn read_response(raw: ureq::Response) -> Result<Response, TransportError> {
    let status = raw.status();
    let headers: BTreeMap<String, String> = raw
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            let value = raw.header(&name)?.to_string();
            Some((name, value))
        })
        .collect();

    let mut bytes = Vec::new();
    raw.into_reader()
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| TransportError::Body(e.to_string()))?;

    match String::from_utf8(bytes) {
        Ok(text) => Ok(Response::from_raw(status, headers, &text)),
        Err(err) => {
            let bytes = err.into_bytes();
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            Ok(Response::new(
                status,
                headers,
                serde_json::Value::String(encoded),
                bytes.len(),
            ))
        }
    }
}

/// Split `Name: value`. Returns `None` when there is no colon or the name is blank.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let this = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || this.send_blocking(&request))
            .await
            .map_err(|e| TransportError::Worker(e.to_string()))?
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
