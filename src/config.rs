use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Middleware configuration ────────────────────────────────────

/// Options recognised by [`crate::Crashless`].
///
/// Every field has a default, so `CrashlessConfig::default()` (or `{}` in
/// JSON) is a complete configuration. Loading from files or the environment
/// is left to the host; this type only needs to deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashlessConfig {
    /// HTML / JSON dashboard view
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,

    /// JSON snapshot exporter
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Prometheus text exporter
    #[serde(default = "default_prometheus_path")]
    pub prometheus_path: String,

    /// Shown on the dashboard and attached as the `app` label
    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default = "default_true")]
    pub enable_dashboard: bool,

    /// Catch panics and detach early replies. When off the middleware only
    /// tracks requests.
    #[serde(default = "default_true")]
    pub enable_async_wrap: bool,

    /// Include the internal `cause` in client error bodies (development only)
    #[serde(default)]
    pub verbose_errors: bool,

    /// Add `x-response-time-us` and `server-timing` response headers
    #[serde(default = "default_true")]
    pub timing_headers: bool,

    /// Named route buckets kept before folding into `unmatched`
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,

    /// Distinct error codes kept before folding into `OTHER`
    #[serde(default = "default_max_error_codes")]
    pub max_error_codes: usize,

    /// Size of the recent-request ring buffer
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,
}

fn default_dashboard_path() -> String {
    "/_crashless".into()
}
fn default_metrics_path() -> String {
    "/metrics.json".into()
}
fn default_prometheus_path() -> String {
    "/metrics".into()
}
fn default_app_name() -> String {
    "crashless".into()
}
fn default_true() -> bool {
    true
}
fn default_max_routes() -> usize {
    500
}
fn default_max_error_codes() -> usize {
    100
}
fn default_recent_events() -> usize {
    50
}

impl Default for CrashlessConfig {
    fn default() -> Self {
        Self {
            dashboard_path: default_dashboard_path(),
            metrics_path: default_metrics_path(),
            prometheus_path: default_prometheus_path(),
            app_name: default_app_name(),
            enable_dashboard: true,
            enable_async_wrap: true,
            verbose_errors: false,
            timing_headers: true,
            max_routes: default_max_routes(),
            max_error_codes: default_max_error_codes(),
            recent_events: default_recent_events(),
        }
    }
}

impl CrashlessConfig {
    /// Reject configurations that would mount broken or clashing routes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = [
            ("dashboardPath", &self.dashboard_path),
            ("metricsPath", &self.metrics_path),
            ("prometheusPath", &self.prometheus_path),
        ];

        for (field, path) in paths {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    field,
                    path: path.clone(),
                });
            }
        }
        for (i, (a, pa)) in paths.iter().enumerate() {
            for (b, pb) in &paths[i + 1..] {
                if pa == pb {
                    return Err(ConfigError::DuplicatePath {
                        first: *a,
                        second: *b,
                        path: (*pa).clone(),
                    });
                }
            }
        }

        if self.app_name.trim().is_empty() {
            return Err(ConfigError::EmptyAppName);
        }
        for (field, value) in [
            ("maxRoutes", self.max_routes),
            ("maxErrorCodes", self.max_error_codes),
            ("recentEvents", self.recent_events),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(field));
            }
        }
        Ok(())
    }

    /// Route serving the dashboard's server-sent event stream.
    pub fn dashboard_stream_path(&self) -> String {
        format!("{}/stream", self.dashboard_path.trim_end_matches('/'))
    }
}
