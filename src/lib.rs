//! Request interception, error normalization and live metrics for axum.
//!
//! ```ignore
//! let crashless = Crashless::new(CrashlessConfig::default())?;
//! let app = crashless.install(Router::new().route("/users/:id", get(get_user)));
//! ```
//!
//! Every request routed through `app` is timed and recorded; typed errors,
//! `Err` returns and panics (sync or after an `.await`) become a JSON error
//! body with a stable `code`. Aggregates are served at the configured
//! dashboard, JSON and Prometheus paths.

pub mod boundary;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod metrics;
pub mod middleware;
pub mod server;

pub use boundary::{settle, Reply};
pub use clock::RequestId;
pub use config::CrashlessConfig;
pub use error::{create_error, normalize, ConfigError, Failure, HttpError, NormalizedError};
pub use metrics::{MetricsSnapshot, MetricsStore, RequestEvent};
pub use server::{Crashless, CrashlessState};
