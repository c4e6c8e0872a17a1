use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;

use crate::config::CrashlessConfig;
use crate::dashboard::{self, AllowAll, BasicRenderer, DashboardGuard, DashboardRenderer};
use crate::error::ConfigError;
use crate::export;
use crate::metrics::{MetricsStore, StoreLimits};
use crate::middleware::capture;

/// Shared state handed to the middleware and to every observability route.
#[derive(Clone)]
pub struct CrashlessState {
    pub config: Arc<CrashlessConfig>,

    /// Central metrics store: the tracker pushes events, exporters read snapshots.
    pub store: Arc<MetricsStore>,

    pub renderer: Arc<dyn DashboardRenderer>,
    pub guard: Arc<dyn DashboardGuard>,
}

/// The installable unit. Owns one [`MetricsStore`]; create one per app (or
/// per test, for isolation).
pub struct Crashless {
    state: CrashlessState,
}

impl Crashless {
    pub fn new(config: CrashlessConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let limits = StoreLimits {
            max_routes: config.max_routes,
            max_error_codes: config.max_error_codes,
            recent_events: config.recent_events,
        };
        let store = Arc::new(MetricsStore::new(config.app_name.clone(), limits));

        Ok(Self {
            state: CrashlessState {
                config: Arc::new(config),
                store,
                renderer: Arc::new(BasicRenderer),
                guard: Arc::new(AllowAll),
            },
        })
    }

    /// Replace the default HTML table with another dashboard view.
    pub fn with_renderer(mut self, renderer: impl DashboardRenderer + 'static) -> Self {
        self.state.renderer = Arc::new(renderer);
        self
    }

    /// Restrict who may read the dashboard.
    pub fn with_guard(mut self, guard: impl DashboardGuard + 'static) -> Self {
        self.state.guard = Arc::new(guard);
        self
    }

    pub fn config(&self) -> &CrashlessConfig {
        &self.state.config
    }

    pub fn store(&self) -> Arc<MetricsStore> {
        self.state.store.clone()
    }

    pub fn state(&self) -> CrashlessState {
        self.state.clone()
    }

    /// Zero every aggregate; for test isolation or process teardown.
    pub fn reset(&self) {
        self.state.store.reset();
    }

    /// Wrap every route of `app` with the tracking middleware, then mount the
    /// observability routes next to them. The observability routes are not
    /// tracked themselves. Panics (as `Router::merge` does) if `app` already
    /// serves one of the configured paths.
    pub fn install<S>(&self, app: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let cfg = &self.state.config;
        tracing::info!(
            app = %cfg.app_name,
            dashboard = ?cfg.enable_dashboard.then_some(cfg.dashboard_path.as_str()),
            metrics = %cfg.metrics_path,
            prometheus = %cfg.prometheus_path,
            async_wrap = cfg.enable_async_wrap,
            "crashless installed"
        );

        // `merge` keeps the fallback of its argument when neither side set
        // one, so the tracked host router goes last.
        self.routes()
            .merge(app.layer(axum_mw::from_fn_with_state(self.state.clone(), capture)))
    }

    /// Just the observability routes: JSON, Prometheus and the dashboard.
    pub fn routes<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let cfg = &self.state.config;
        let mut router = Router::new()
            // ── Exporters ───────────────────────────────────────────
            .route(&cfg.metrics_path, get(export::metrics_json))
            .route(&cfg.prometheus_path, get(export::metrics_prometheus));

        // ── Dashboard ───────────────────────────────────────────────
        if cfg.enable_dashboard {
            router = router
                .route(&cfg.dashboard_path, get(dashboard::dashboard))
                .route(&cfg.dashboard_stream_path(), get(dashboard::dashboard_stream));
        }

        router.with_state(self.state.clone())
    }
}
