//! Read-only dashboard: an HTML view (or the raw snapshot for client-side
//! views) plus a server-sent event stream that pushes a fresh snapshot
//! every second.

use std::convert::Infallible;
use std::fmt::Write;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::error::create_error;
use crate::metrics::MetricsSnapshot;
use crate::server::CrashlessState;

/// Push interval for the dashboard stream
const STREAM_INTERVAL: Duration = Duration::from_secs(1);

// ─── Collaborators ───────────────────────────────────────────────

/// Turns a snapshot into an HTML page.
pub trait DashboardRenderer: Send + Sync {
    fn render(&self, snapshot: &MetricsSnapshot) -> String;
}

/// Decides whether a request may read the dashboard.
pub trait DashboardGuard: Send + Sync {
    fn allow(&self, headers: &HeaderMap) -> bool;
}

/// No restriction. The default.
pub struct AllowAll;

impl DashboardGuard for AllowAll {
    fn allow(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Requires `Authorization: Bearer <token>`.
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl DashboardGuard for BearerToken {
    fn allow(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == self.0)
    }
}

// ─── GET {dashboardPath} ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// `json` returns the snapshot instead of HTML
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn dashboard(
    State(state): State<CrashlessState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Response {
    if !state.guard.allow(&headers) {
        return unauthorized();
    }

    let snapshot = state.store.snapshot();
    if wants_json(&headers, query.format.as_deref()) {
        return Json(snapshot).into_response();
    }
    Html(state.renderer.render(&snapshot)).into_response()
}

// ─── GET {dashboardPath}/stream ──────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `MetricsSnapshot` as JSON every second.

pub async fn dashboard_stream(State(state): State<CrashlessState>, headers: HeaderMap) -> Response {
    if !state.guard.allow(&headers) {
        return unauthorized();
    }

    let interval = tokio::time::interval(STREAM_INTERVAL);
    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(json))
    });

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

fn unauthorized() -> Response {
    let mut response =
        create_error("Dashboard access denied", 401, "UNAUTHORIZED").into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

fn wants_json(headers: &HeaderMap, format: Option<&str>) -> bool {
    if let Some(format) = format {
        return format.eq_ignore_ascii_case("json");
    }
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    accept.contains("application/json") && !accept.contains("text/html")
}

// ─── Default renderer ────────────────────────────────────────────

/// Plain server-rendered tables; refreshes itself every five seconds.
pub struct BasicRenderer;

impl DashboardRenderer for BasicRenderer {
    fn render(&self, s: &MetricsSnapshot) -> String {
        let mut out = String::with_capacity(8 * 1024);
        let title = escape_html(&s.app_name);

        let _ = write!(
            out,
            "<!doctype html><html><head><meta charset=\"utf-8\">\
             <meta http-equiv=\"refresh\" content=\"5\">\
             <title>{title} · crashless</title></head><body>"
        );
        let _ = write!(out, "<h1>{title}</h1>");
        let _ = write!(
            out,
            "<p>up {:.0}s · {} requests · {} errors ({:.2}%) · {} cancelled · {} in flight · {:.2} req/s</p>",
            s.uptime_secs,
            s.total_requests,
            s.error_count,
            s.error_rate * 100.0,
            s.cancelled_count,
            s.in_flight,
            s.requests_per_sec,
        );

        let l = &s.latency;
        let _ = write!(
            out,
            "<h2>Latency (ms)</h2><table><tr><th>min</th><th>avg</th><th>p50</th>\
             <th>p95</th><th>p99</th><th>max</th></tr>\
             <tr><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr></table>",
            l.min_ms, l.avg_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms,
        );

        out.push_str("<h2>Status</h2><table><tr>");
        for class in s.status_classes.keys() {
            let _ = write!(out, "<th>{class}</th>");
        }
        out.push_str("</tr><tr>");
        for count in s.status_classes.values() {
            let _ = write!(out, "<td>{count}</td>");
        }
        out.push_str("</tr></table>");

        out.push_str(
            "<h2>Routes</h2><table><tr><th>method</th><th>route</th><th>count</th>\
             <th>errors</th><th>avg ms</th><th>max ms</th></tr>",
        );
        for r in &s.routes {
            let _ = write!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                escape_html(&r.method),
                escape_html(&r.route),
                r.count,
                r.errors,
                r.avg_ms,
                r.max_ms,
            );
        }
        out.push_str("</table>");

        if !s.error_codes.is_empty() {
            out.push_str("<h2>Errors</h2><table><tr><th>code</th><th>count</th></tr>");
            for (code, count) in &s.error_codes {
                let _ = write!(out, "<tr><td>{}</td><td>{count}</td></tr>", escape_html(code));
            }
            out.push_str("</table>");
        }

        out.push_str(
            "<h2>Recent</h2><table><tr><th>time</th><th>method</th><th>route</th>\
             <th>status</th><th>ms</th><th>code</th></tr>",
        );
        for e in s.recent.iter().rev() {
            let _ = write!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
                e.timestamp.format("%H:%M:%S%.3f"),
                escape_html(&e.method),
                escape_html(&e.route),
                e.status_code,
                e.duration_ms,
                escape_html(e.error_code.as_deref().unwrap_or("")),
            );
        }
        out.push_str("</table></body></html>");
        out
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsStore, StoreLimits};

    #[test]
    fn bearer_token_guard() {
        let guard = BearerToken::new("s3cret");
        let mut headers = HeaderMap::new();
        assert!(!guard.allow(&headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!guard.allow(&headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(guard.allow(&headers));
    }

    #[test]
    fn json_negotiation() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers, None));
        assert!(wants_json(&headers, Some("JSON")));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers, None));
        assert!(!wants_json(&headers, Some("html")));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9"),
        );
        assert!(!wants_json(&headers, None));
    }

    #[test]
    fn basic_renderer_escapes_route_names() {
        let store = MetricsStore::new("<shop>", StoreLimits::default());
        let html = BasicRenderer.render(&store.snapshot());
        assert!(html.contains("&lt;shop&gt;"));
        assert!(!html.contains("<shop>"));
    }
}
