pub mod json;
pub mod prometheus;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::server::CrashlessState;

// ─── GET {metricsPath} ───────────────────────────────────────────

pub async fn metrics_json(State(state): State<CrashlessState>) -> Response {
    let body = json::render(&state.store.snapshot());
    ([(header::CONTENT_TYPE, json::CONTENT_TYPE)], body).into_response()
}

// ─── GET {prometheusPath} ────────────────────────────────────────

pub async fn metrics_prometheus(State(state): State<CrashlessState>) -> Response {
    let body = prometheus::render(&state.store.snapshot());
    ([(header::CONTENT_TYPE, prometheus::CONTENT_TYPE)], body).into_response()
}
