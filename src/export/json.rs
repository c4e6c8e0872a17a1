//! JSON exporter. The schema is the camelCase serde form of
//! [`MetricsSnapshot`]:
//!
//! ```text
//! { "appName", "startedAt", "generatedAt", "uptimeSecs",
//!   "totalRequests", "errorCount", "cancelledCount", "inFlight", "bytesOut",
//!   "requestsPerSec", "errorRate",
//!   "latency": { "count", "minMs", "maxMs", "avgMs", "sumMs",
//!                "p50Ms", "p90Ms", "p95Ms", "p99Ms", "p999Ms" },
//!   "histogram": [ { "upperMs": 5.0 | null, "count" } ],
//!   "statusClasses": { "1xx".."5xx": n },
//!   "statusCodes": { "200": n }, "errorCodes": { "CODE": n },
//!   "routes": [ { "method", "route", "count", "errors", "avgMs", "maxMs" } ],
//!   "routeOverflow",
//!   "recent": [ { "id", "method", "route", "statusCode", "durationMs",
//!                 "timestamp", "errorCode"? } ],
//!   "timeline": [ { "offsetMs", "count", "errors", "avgMs" } ] }
//! ```

use crate::metrics::MetricsSnapshot;

pub const CONTENT_TYPE: &str = "application/json";

/// Serialize a snapshot. Pure; never fails the caller.
pub fn render(snapshot: &MetricsSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_else(|err| {
        tracing::error!(error = %err, "snapshot serialization failed");
        "{}".to_owned()
    })
}

pub fn parse(body: &str) -> Result<MetricsSnapshot, serde_json::Error> {
    serde_json::from_str(body)
}
