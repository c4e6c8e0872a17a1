//! Routes that misbehave on purpose, to show what the boundary catches.

use std::time::Duration;

use axum::{http::StatusCode, Extension, Json};
use serde_json::{json, Value};

use crashless::{create_error, Reply, RequestId};

// ─── GET /api/faults/panic ───────────────────────────────────────

pub async fn sync_panic() -> Json<Value> {
    let items: Vec<u32> = Vec::new();
    Json(json!({ "first": items[0] }))
}

// ─── GET /api/faults/async-panic ─────────────────────────────────

pub async fn async_panic() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::panic::panic_any(create_error("Upstream timed out", 504, "UPSTREAM_TIMEOUT"))
}

// ─── GET /api/faults/late ────────────────────────────────────────

/// Replies immediately, then fails while finishing background work.
pub async fn reply_then_fail(
    Extension(reply): Extension<Reply>,
    Extension(id): Extension<RequestId>,
) -> StatusCode {
    reply.send((StatusCode::ACCEPTED, Json(json!({ "accepted": id.as_str() }))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    panic!("audit log write failed for {id}");
}

// ─── GET /api/faults/slow ────────────────────────────────────────

/// Handy for watching the in-flight gauge, or for disconnecting mid-request.
pub async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "done"
}
