use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::HttpBody;
use axum::response::Response;

use crate::clock::{RequestId, Stopwatch};
use crate::error::INTERNAL_ERROR;
use crate::metrics::{MetricsStore, Outcome, RequestEvent, UNMATCHED_ROUTE};

/// Status recorded for requests whose client went away (nginx convention).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// How a request finished, as seen by the tracker.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status_code: u16,
    pub error_code: Option<String>,
    pub bytes_out: Option<u64>,
    pub outcome: Outcome,
}

impl Completion {
    /// Completion for a response the client received. `error_code` is the
    /// code of the normalized error behind it, if any.
    pub fn from_response(response: &Response, error_code: Option<String>) -> Self {
        Self {
            status_code: response.status().as_u16(),
            bytes_out: response.body().size_hint().exact(),
            outcome: if error_code.is_some() {
                Outcome::Failed
            } else {
                Outcome::Completed
            },
            error_code,
        }
    }

    fn cancelled() -> Self {
        Self {
            status_code: CLIENT_CLOSED_REQUEST,
            error_code: None,
            bytes_out: None,
            outcome: Outcome::Cancelled,
        }
    }

    fn panicked() -> Self {
        Self {
            status_code: 500,
            error_code: Some(INTERNAL_ERROR.to_owned()),
            bytes_out: None,
            outcome: Outcome::Failed,
        }
    }
}

/// Per-request observer. Finalizes exactly once: the first `finish` wins,
/// later ones are no-ops, and dropping an unfinished tracker records the
/// request as cancelled (or failed, if dropped during a panic).
pub struct RequestTracker {
    id: RequestId,
    method: String,
    route: String,
    stopwatch: Stopwatch,
    store: Arc<MetricsStore>,
    finalized: AtomicBool,
}

impl RequestTracker {
    /// `matched_route` is the route template; `None` means no route matched.
    pub fn start(store: Arc<MetricsStore>, method: &str, matched_route: Option<&str>) -> Self {
        store.request_started();
        Self {
            id: RequestId::new(),
            method: method.to_owned(),
            route: matched_route.unwrap_or(UNMATCHED_ROUTE).to_owned(),
            stopwatch: Stopwatch::start(),
            store,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Emit the request event. Returns `false` if the request was already
    /// finalized.
    pub fn finish(&self, completion: Completion) -> bool {
        if self.finalized.swap(true, Ordering::AcqRel) {
            tracing::debug!(request_id = %self.id, "duplicate completion ignored");
            return false;
        }

        let event = RequestEvent {
            id: self.id.clone(),
            method: self.method.clone(),
            route: self.route.clone(),
            status_code: completion.status_code,
            duration: self.stopwatch.elapsed(),
            timestamp: self.stopwatch.started_at(),
            error_code: completion.error_code,
            bytes_out: completion.bytes_out,
            outcome: completion.outcome,
        };

        // Recording must never fail the request it describes
        let store = &self.store;
        if std::panic::catch_unwind(AssertUnwindSafe(|| store.ingest(event))).is_err() {
            tracing::error!(request_id = %self.id, "metrics ingest failed, event dropped");
        }
        self.store.request_settled();
        true
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if self.is_finished() {
            return;
        }
        if std::thread::panicking() {
            tracing::error!(request_id = %self.id, route = %self.route, "handler panicked outside the boundary");
            self.finish(Completion::panicked());
        } else {
            tracing::info!(request_id = %self.id, route = %self.route, "client disconnected before completion");
            self.finish(Completion::cancelled());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StoreLimits;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn store() -> Arc<MetricsStore> {
        Arc::new(MetricsStore::new("test", StoreLimits::default()))
    }

    #[test]
    fn finishes_exactly_once() {
        let store = store();
        let tracker = RequestTracker::start(store.clone(), "GET", Some("/users/:id"));
        let response = (StatusCode::OK, "hello").into_response();

        assert!(tracker.finish(Completion::from_response(&response, None)));
        assert!(!tracker.finish(Completion::from_response(&response, None)));
        drop(tracker);

        let snap = store.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.error_count, 0);
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.bytes_out, 5);
        assert_eq!(snap.routes[0].route, "/users/:id");
    }

    #[test]
    fn dropped_tracker_counts_as_cancelled() {
        let store = store();
        let tracker = RequestTracker::start(store.clone(), "GET", None);
        assert_eq!(store.snapshot().in_flight, 1);
        drop(tracker);

        let snap = store.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.cancelled_count, 1);
        assert_eq!(snap.error_count, 0);
        assert_eq!(snap.status_codes[&CLIENT_CLOSED_REQUEST], 1);
        assert_eq!(snap.routes[0].route, UNMATCHED_ROUTE);
        assert_eq!(snap.in_flight, 0);
    }

    #[test]
    fn error_code_marks_failure() {
        let store = store();
        let tracker = RequestTracker::start(store.clone(), "POST", Some("/orders"));
        let response = StatusCode::CONFLICT.into_response();
        tracker.finish(Completion::from_response(&response, Some("ORDER_EXISTS".into())));

        let snap = store.snapshot();
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.error_codes["ORDER_EXISTS"], 1);
        assert_eq!(snap.recent[0].error_code.as_deref(), Some("ORDER_EXISTS"));
    }
}
