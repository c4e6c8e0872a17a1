pub mod percentiles;
pub mod store;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::RequestId;

pub use percentiles::PercentileSet;
pub use store::{MetricsSnapshot, MetricsStore, StoreLimits};

/// Route key used when no route template matched, and for every route that
/// arrives after the named-route budget is spent.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// How a tracked request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The handler produced a response without failing.
    Completed,
    /// The handler failed and the failure was normalized.
    Failed,
    /// The client went away before the request finished.
    Cancelled,
}

/// A single finished request.
/// This is the "write" side: the tracker builds one and moves it into
/// [`MetricsStore::ingest`], which folds it into aggregates and drops it.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub id: RequestId,
    pub method: String,
    /// Route template such as `/users/:id`, or [`UNMATCHED_ROUTE`]
    pub route: String,
    pub status_code: u16,
    pub duration: Duration,
    /// Wall-clock start of the request
    pub timestamp: DateTime<Utc>,
    /// Present iff the request ended in a normalized error
    pub error_code: Option<String>,
    pub bytes_out: Option<u64>,
    pub outcome: Outcome,
}

impl RequestEvent {
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }
}

/// Coarse status bucket (`2xx`, `4xx`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const ALL: [StatusClass; 5] = [
        Self::Informational,
        Self::Success,
        Self::Redirection,
        Self::ClientError,
        Self::ServerError,
    ];

    /// Anything outside `100..=499` counts as a server error.
    pub fn of(status_code: u16) -> Self {
        match status_code {
            100..=199 => Self::Informational,
            200..=299 => Self::Success,
            300..=399 => Self::Redirection,
            400..=499 => Self::ClientError,
            _ => Self::ServerError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Informational => "1xx",
            Self::Success => "2xx",
            Self::Redirection => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}
