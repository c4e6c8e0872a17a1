//! Prometheus text exposition (format 0.0.4) rendered from a snapshot.
//! Metric names are fixed; every series carries an `app` label.

use std::fmt::Write;

use crate::metrics::MetricsSnapshot;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Render the snapshot. Pure function; the output only depends on `snapshot`.
pub fn render(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(4096);
    let app = escape_label(&snapshot.app_name);

    family(
        &mut out,
        "crashless_http_requests_total",
        "counter",
        "Requests handled, by method and route template.",
    );
    for r in &snapshot.routes {
        let _ = writeln!(
            out,
            "crashless_http_requests_total{{app=\"{app}\",method=\"{}\",route=\"{}\"}} {}",
            escape_label(&r.method),
            escape_label(&r.route),
            r.count
        );
    }

    family(
        &mut out,
        "crashless_http_request_errors_total",
        "counter",
        "Requests that ended in a normalized error, by method and route template.",
    );
    for r in &snapshot.routes {
        let _ = writeln!(
            out,
            "crashless_http_request_errors_total{{app=\"{app}\",method=\"{}\",route=\"{}\"}} {}",
            escape_label(&r.method),
            escape_label(&r.route),
            r.errors
        );
    }

    family(
        &mut out,
        "crashless_http_responses_total",
        "counter",
        "Responses by status class.",
    );
    for (class, count) in &snapshot.status_classes {
        let _ = writeln!(
            out,
            "crashless_http_responses_total{{app=\"{app}\",class=\"{class}\"}} {count}"
        );
    }

    family(
        &mut out,
        "crashless_http_errors_total",
        "counter",
        "Normalized errors by error code.",
    );
    for (code, count) in &snapshot.error_codes {
        let _ = writeln!(
            out,
            "crashless_http_errors_total{{app=\"{app}\",code=\"{}\"}} {count}",
            escape_label(code)
        );
    }

    family(
        &mut out,
        "crashless_http_requests_cancelled_total",
        "counter",
        "Requests whose client disconnected before completion.",
    );
    let _ = writeln!(
        out,
        "crashless_http_requests_cancelled_total{{app=\"{app}\"}} {}",
        snapshot.cancelled_count
    );

    family(
        &mut out,
        "crashless_route_overflow_total",
        "counter",
        "Requests folded into the unmatched route because the route budget was spent.",
    );
    let _ = writeln!(
        out,
        "crashless_route_overflow_total{{app=\"{app}\"}} {}",
        snapshot.route_overflow
    );

    family(
        &mut out,
        "crashless_http_requests_in_flight",
        "gauge",
        "Requests currently being handled.",
    );
    let _ = writeln!(
        out,
        "crashless_http_requests_in_flight{{app=\"{app}\"}} {}",
        snapshot.in_flight
    );

    // ── Latency histogram (cumulative buckets, seconds) ─────────
    let name = "crashless_http_request_duration_seconds";
    family(&mut out, name, "histogram", "Request latency.");
    let mut cumulative = 0u64;
    for bucket in &snapshot.histogram {
        cumulative += bucket.count;
        if let Some(upper_ms) = bucket.upper_ms {
            let _ = writeln!(
                out,
                "{name}_bucket{{app=\"{app}\",le=\"{}\"}} {cumulative}",
                upper_ms / 1_000.0
            );
        }
    }
    let _ = writeln!(
        out,
        "{name}_bucket{{app=\"{app}\",le=\"+Inf\"}} {}",
        snapshot.latency.count
    );
    let _ = writeln!(
        out,
        "{name}_sum{{app=\"{app}\"}} {}",
        snapshot.latency.sum_ms / 1_000.0
    );
    let _ = writeln!(
        out,
        "{name}_count{{app=\"{app}\"}} {}",
        snapshot.latency.count
    );

    family(
        &mut out,
        "crashless_uptime_seconds",
        "gauge",
        "Seconds since the metrics store was created or reset.",
    );
    let _ = writeln!(
        out,
        "crashless_uptime_seconds{{app=\"{app}\"}} {}",
        snapshot.uptime_secs
    );

    out
}
