//! Scripted in-process transport for tests.
//!
//! Routes are matched by method and template path; handlers see the resolved
//! request and build the response.
//!
//! ```
//! use restfuzz_transport::MockTransport;
//! use restfuzz_types::{HttpMethod, Response};
//! use serde_json::json;
//!
//! let mut mock = MockTransport::new();
//! mock.add_route(HttpMethod::Post, "/users", |_req| {
//!     Response::json(201, json!({"userId": "u1"}))
//! });
//! mock.add_route(HttpMethod::Get, "/users/{userId}", |req| {
//!     Response::json(200, json!({"userId": req.path.trim_start_matches("/users/")}))
//! });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use restfuzz_types::{match_template, HttpMethod, Request, Response};
use serde_json::json;

use crate::{Transport, TransportError};

type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

struct Route {
    method: HttpMethod,
    template: String,
    handler: Handler,
}

/// A transport answering from pre-registered handlers.
#[derive(Default)]
pub struct MockTransport {
    routes: Vec<Route>,
    /// Sent request labels, in order.
    calls: Mutex<Vec<String>>,
    /// Number of upcoming sends that fail with a connection error.
    fail_next: AtomicUsize,
    /// If set, all sends fail with this error.
    force_error: Option<TransportError>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route<F>(&mut self, method: HttpMethod, template: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method,
            template: template.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Route that always answers with the same JSON body.
    pub fn add_json(
        &mut self,
        method: HttpMethod,
        template: &str,
        status: u16,
        body: serde_json::Value,
    ) -> &mut Self {
        self.add_route(method, template, move |_| Response::json(status, body.clone()))
    }

    pub fn set_error(&mut self, error: TransportError) -> &mut Self {
        self.force_error = Some(error);
        self
    }

    pub fn clear_error(&mut self) -> &mut Self {
        self.force_error = None;
        self
    }

    /// Fail the next `n` sends with a connection error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Labels (`GET /users/u1`) of every request that reached a route lookup.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn dispatch(&self, request: &Request) -> Response {
        self.routes
            .iter()
            .find(|r| r.method == request.method && match_template(&r.template, &request.path))
            .map(|r| (r.handler)(request))
            .unwrap_or_else(|| Response::json(404, json!({"error": "not found"})))
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        if let Some(err) = &self.force_error {
            return Err(err.clone());
        }
        if !request.is_resolved() {
            let key = request
                .placeholder_keys()
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(TransportError::Unresolved(key));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect("mock connection refused".to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(request.label());
        Ok(self.dispatch(request))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restfuzz_types::{EndpointId, Slot};

    fn get_user(id: &str) -> Request {
        let mut req = Request::new(EndpointId(1), HttpMethod::Get, "/users/{userId}");
        req.path_params
            .insert("userId".into(), Slot::concrete(json!(id)));
        req.path = req.render_path().unwrap();
        req
    }

    #[tokio::test]
    async fn test_routes_match_templates() {
        let mut mock = MockTransport::new();
        mock.add_json(HttpMethod::Get, "/users/{userId}", 200, json!({"ok": true}));
        let resp = mock.send(&get_user("u1")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(mock.calls(), vec!["GET /users/u1"]);

        let other = Request::new(EndpointId(0), HttpMethod::Get, "/pets");
        assert_eq!(mock.send(&other).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_fail_next_then_recovers() {
        let mut mock = MockTransport::new();
        mock.add_json(HttpMethod::Get, "/users/{userId}", 200, json!({}));
        mock.fail_next(2);
        assert!(mock.send(&get_user("a")).await.is_err());
        assert!(mock.send(&get_user("a")).await.is_err());
        assert!(mock.send(&get_user("a")).await.is_ok());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_and_forced_errors() {
        let mut mock = MockTransport::new();
        let mut req = Request::new(EndpointId(1), HttpMethod::Get, "/users/{userId}");
        req.path_params
            .insert("userId".into(), Slot::placeholder("userId"));
        assert_eq!(
            mock.send(&req).await.unwrap_err(),
            TransportError::Unresolved("userId".into())
        );
        mock.set_error(TransportError::Timeout);
        assert_eq!(
            mock.send(&get_user("x")).await.unwrap_err(),
            TransportError::Timeout
        );
    }
}
