use axum::{
    body::{Body, HttpBody},
    extract::{MatchedPath, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

use super::tracker::{Completion, RequestTracker};
use crate::boundary::{self, Reply};
use crate::error::{normalize, Failure, HttpError, NormalizedError};
use crate::metrics::Outcome;
use crate::server::CrashlessState;

/// Largest plain-text error body read back into a JSON error message.
const PLAIN_ERROR_BODY_LIMIT: usize = 16 * 1024;

/// Tracking and interception middleware installed by
/// [`Crashless::install`](crate::Crashless::install).
///
/// Adds three response headers:
///
///   X-Request-Id        — the tracker's request id
///   X-Response-Time-Us  — total handler wall time in microseconds
///   Server-Timing       — same value in the standard Server-Timing format
///
/// The last two only when `timingHeaders` is on.
pub async fn capture(State(state): State<CrashlessState>, mut req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned());
    let tracker = RequestTracker::start(state.store.clone(), req.method().as_str(), route.as_deref());
    req.extensions_mut().insert(tracker.id().clone());

    if !state.config.enable_async_wrap {
        let response = next.run(req).await;
        return settle_response(&state, &tracker, response).await;
    }

    let (reply, mut early) = Reply::channel();
    req.extensions_mut().insert(reply);

    let mut handler = Box::pin(boundary::catch_response(next.run(req)));

    tokio::select! {
        biased;

        // Handler replied through `Reply` and may still be running
        Ok(sent) = &mut early => {
            let sent = decorate(&state, &tracker, sent);
            let receipt = SentReply::of(&sent);

            tokio::spawn(async move {
                let late = handler.await;
                receipt.record(&tracker, late);
            });

            sent
        }

        settled = &mut handler => {
            // A reply sent in the same poll that settled the handler still wins
            if let Ok(sent) = early.try_recv() {
                let sent = decorate(&state, &tracker, sent);
                SentReply::of(&sent).record(&tracker, settled);
                sent
            } else {
                let response = match settled {
                    Ok(response) => response,
                    Err(err) => err.render(state.config.verbose_errors),
                };
                settle_response(&state, &tracker, response).await
            }
        }
    }
}

// ─── Early replies ───────────────────────────────────────────────

/// What the client received through [`Reply`], kept until the handler
/// settles.
struct SentReply {
    status_code: u16,
    bytes_out: Option<u64>,
    error: Option<NormalizedError>,
}

impl SentReply {
    fn of(sent: &Response) -> Self {
        Self {
            status_code: sent.status().as_u16(),
            bytes_out: sent.body().size_hint().exact(),
            error: sent.extensions().get::<NormalizedError>().cloned(),
        }
    }

    /// Finalize with the handler's late output. The recorded status is the
    /// one sent; a late failure takes precedence over an error that was
    /// itself the reply.
    fn record(self, tracker: &RequestTracker, late: Result<Response, NormalizedError>) {
        let late_error = match late {
            Ok(late) => {
                tracing::debug!(request_id = %tracker.id(), "response already sent, discarding handler output");
                late.extensions().get::<NormalizedError>().cloned()
            }
            Err(err) => Some(err),
        };
        if let Some(err) = &late_error {
            tracing::warn!(
                request_id = %tracker.id(),
                route = %tracker.route(),
                code = %err.code(),
                cause = ?err.cause(),
                "handler failed after its response was sent"
            );
        }

        let error = late_error.or(self.error);
        tracker.finish(Completion {
            status_code: self.status_code,
            outcome: if error.is_some() {
                Outcome::Failed
            } else {
                Outcome::Completed
            },
            error_code: error.map(|e| e.code().to_owned()),
            bytes_out: self.bytes_out,
        });
    }
}

// ─── Settled responses ───────────────────────────────────────────

/// Record a response that is about to be returned to the client.
async fn settle_response(
    state: &CrashlessState,
    tracker: &RequestTracker,
    response: Response,
) -> Response {
    let verbose = state.config.verbose_errors;
    let normalized = response.extensions().get::<NormalizedError>().cloned();

    let (response, error) = match normalized {
        // Re-render so verbose mode also applies to errors built by handlers
        Some(err) if verbose => (rerender(&err, response, true), Some(err)),
        Some(err) => (response, Some(err)),
        None if is_plain_text_error(&response) => {
            let (parts, body) = response.into_parts();
            let text = axum::body::to_bytes(body, PLAIN_ERROR_BODY_LIMIT)
                .await
                .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_owned())
                .unwrap_or_default();
            let err = normalize(Failure::Structured(
                HttpError::new(text).with_status(parts.status.as_u16()),
            ));
            let original = Response::from_parts(parts, Body::empty());
            (rerender(&err, original, verbose), Some(err))
        }
        None => (response, None),
    };

    let response = decorate(state, tracker, response);
    log_completion(tracker, &response, error.as_ref());
    tracker.finish(Completion::from_response(
        &response,
        error.map(|e| e.code().to_owned()),
    ));
    response
}

/// Extractor rejections and other plain-text failures (`text/plain`, 4xx/5xx).
fn is_plain_text_error(response: &Response) -> bool {
    let status = response.status();
    (status.is_client_error() || status.is_server_error())
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/plain"))
}

/// Render `err` as JSON, keeping the headers the handler set on `original`.
fn rerender(err: &NormalizedError, original: Response, verbose: bool) -> Response {
    let mut rendered = err.clone().render(verbose);
    let (mut parts, _) = original.into_parts();
    parts.headers.remove(header::CONTENT_TYPE);
    parts.headers.remove(header::CONTENT_LENGTH);
    rendered.headers_mut().extend(parts.headers);
    rendered
}

fn decorate(state: &CrashlessState, tracker: &RequestTracker, mut response: Response) -> Response {
    let headers = response.headers_mut();
    if let Ok(val) = HeaderValue::from_str(tracker.id().as_str()) {
        headers.insert("x-request-id", val);
    }

    if state.config.timing_headers {
        let elapsed = tracker.elapsed();
        if let Ok(val) = HeaderValue::from_str(&elapsed.as_micros().to_string()) {
            headers.insert("x-response-time-us", val);
        }
        let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
        if let Ok(val) = HeaderValue::from_str(&server_timing) {
            headers.insert("server-timing", val);
        }
    }
    response
}

fn log_completion(tracker: &RequestTracker, response: &Response, error: Option<&NormalizedError>) {
    let status = response.status().as_u16();
    let micros = tracker.elapsed().as_micros() as u64;
    match error {
        Some(err) if status >= 500 => tracing::error!(
            request_id = %tracker.id(),
            route = %tracker.route(),
            status,
            code = %err.code(),
            cause = ?err.cause(),
            micros,
            "request failed"
        ),
        Some(err) => tracing::warn!(
            request_id = %tracker.id(),
            route = %tracker.route(),
            status,
            code = %err.code(),
            micros,
            "request rejected"
        ),
        None => tracing::debug!(
            request_id = %tracker.id(),
            route = %tracker.route(),
            status,
            micros,
            "request completed"
        ),
    }
}
