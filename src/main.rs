use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use crashless::{Crashless, CrashlessConfig};

mod handlers;

/// Demo host server: a handful of routes that succeed, fail, panic and
/// reply early, with crashless installed in front of them.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,crashless=debug")),
        )
        .init();

    // ── 1. Configure crashless ───────────────────────────────────
    let config = CrashlessConfig {
        app_name: "crashless-demo".into(),
        verbose_errors: std::env::var("CRASHLESS_VERBOSE").is_ok(),
        ..Default::default()
    };
    let crashless = Crashless::new(config).expect("default configuration is valid");

    // ── 2. Build the host router ─────────────────────────────────
    let state = Arc::new(handlers::AppState::seeded());
    let app = Router::new()
        .route("/api/users/:id", get(handlers::users::get_user))
        .route("/api/users", post(handlers::users::create_user))
        .route("/api/faults/panic", get(handlers::faults::sync_panic))
        .route("/api/faults/async-panic", get(handlers::faults::async_panic))
        .route("/api/faults/late", get(handlers::faults::reply_then_fail))
        .route("/api/faults/slow", get(handlers::faults::slow))
        .with_state(state);

    // ── 3. Install the observability layer ───────────────────────
    let app = crashless.install(app).layer(CorsLayer::permissive());

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to port 3000 — is it already in use?");

    let cfg = crashless.config();
    tracing::info!("listening on http://localhost:3000");
    tracing::info!("dashboard   → http://localhost:3000{}", cfg.dashboard_path);
    tracing::info!("metrics     → http://localhost:3000{}", cfg.metrics_path);
    tracing::info!("prometheus  → http://localhost:3000{}", cfg.prometheus_path);

    axum::serve(listener, app)
        .await
        .expect("Server exited with error");
}
