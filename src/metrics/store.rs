use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::percentiles::PercentileSet;
use super::{Outcome, RequestEvent, StatusClass, UNMATCHED_ROUTE};
use crate::clock::RequestId;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures.
///
/// The counts array is sized once from these bounds, so the latency
/// structure never grows with volume. Quantiles are within 0.1% of the true
/// value; samples above 60 s saturate at 60 s.
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

/// Timeline resolution (one point per window)
const TIMELINE_WINDOW_MS: u64 = 1_000;

/// Timeline points retained (five minutes at one point per second)
const MAX_TIMELINE_POINTS: usize = 300;

/// Error-code bucket that absorbs codes beyond the configured budget
pub const OTHER_ERROR_CODE: &str = "OTHER";

/// Histogram bucket upper bounds (ms) for the dashboard and Prometheus.
const BUCKET_BOUNDS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
];

/// Size limits for the only variable-sized state in the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_routes: usize,
    pub max_error_codes: usize,
    pub recent_events: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_routes: 500,
            max_error_codes: 100,
            recent_events: 50,
        }
    }
}

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe metrics aggregator.
/// The tracker calls `ingest()`; exporters and the dashboard call `snapshot()`.
pub struct MetricsStore {
    app_name: String,
    limits: StoreLimits,
    in_flight: AtomicU64,
    inner: Mutex<Inner>,
}

/// Per-route counters as exposed in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub method: String,
    pub route: String,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// A bucket in the latency distribution. `upper_ms: None` is the overflow
/// bucket (`+Inf`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBucket {
    pub upper_ms: Option<f64>,
    pub count: u64,
}

/// A single entry in the recent-request feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRequest {
    pub id: RequestId,
    pub method: String,
    pub route: String,
    pub status_code: u16,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
}

/// One aggregated point on the timeline chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    /// Window start, relative to `startedAt`
    pub offset_ms: u64,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
}

/// Point-in-time copy of everything the store knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub app_name: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub uptime_secs: f64,

    // Counters
    pub total_requests: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub in_flight: u64,
    pub bytes_out: u64,
    pub requests_per_sec: f64,
    pub error_rate: f64,

    // Latency
    pub latency: PercentileSet,
    pub histogram: Vec<LatencyBucket>,

    // Breakdowns
    pub status_classes: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<u16, u64>,
    pub error_codes: BTreeMap<String, u64>,
    pub routes: Vec<RouteStats>,
    /// Events folded into `unmatched` because the route budget was spent
    pub route_overflow: u64,

    // Visual data
    pub recent: Vec<RecentRequest>,
    pub timeline: Vec<TimelinePoint>,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: String,
    route: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct RouteCounters {
    count: u64,
    errors: u64,
    sum_us: u64,
    max_us: u64,
}

impl RouteCounters {
    fn add(&mut self, duration_us: u64, is_error: bool) {
        self.count += 1;
        self.errors += u64::from(is_error);
        self.sum_us = self.sum_us.saturating_add(duration_us);
        self.max_us = self.max_us.max(duration_us);
    }

    fn to_stats(self, method: &str, route: &str) -> RouteStats {
        RouteStats {
            method: method.to_owned(),
            route: route.to_owned(),
            count: self.count,
            errors: self.errors,
            avg_ms: if self.count > 0 {
                self.sum_us as f64 / self.count as f64 / 1_000.0
            } else {
                0.0
            },
            max_ms: self.max_us as f64 / 1_000.0,
        }
    }
}

struct Inner {
    started: Instant,
    started_at: DateTime<Utc>,

    latency: Histogram<u64>,
    latency_sum_us: u64,

    // Counters
    total_requests: u64,
    error_count: u64,
    cancelled_count: u64,
    bytes_out: u64,
    status_classes: [u64; 5],
    status_codes: BTreeMap<u16, u64>,
    error_codes: HashMap<String, u64>,

    // Named routes are capped; everything else lands in `unmatched`
    routes: HashMap<RouteKey, RouteCounters>,
    unmatched: RouteCounters,
    route_overflow: u64,

    // Rolling window of recent individual requests
    recent: VecDeque<RecentRequest>,

    // Timeline aggregation
    timeline: VecDeque<TimelinePoint>,
    current_window: Option<WindowAccumulator>,
}

/// Running totals for the current timeline window.
struct WindowAccumulator {
    window_start_ms: u64,
    sum_us: u64,
    count: u64,
    errors: u64,
}

impl WindowAccumulator {
    fn to_point(&self) -> TimelinePoint {
        TimelinePoint {
            offset_ms: self.window_start_ms,
            count: self.count,
            errors: self.errors,
            avg_ms: self.sum_us as f64 / self.count.max(1) as f64 / 1_000.0,
        }
    }
}

// ─── MetricsStore impl ───────────────────────────────────────────

impl MetricsStore {
    pub fn new(app_name: impl Into<String>, limits: StoreLimits) -> Self {
        Self {
            app_name: app_name.into(),
            limits,
            in_flight: AtomicU64::new(0),
            inner: Mutex::new(Inner::new(&limits)),
        }
    }

    /// Fold one finished request into the aggregates.
    pub fn ingest(&self, event: RequestEvent) {
        self.inner.lock().ingest(event, &self.limits);
    }

    /// Consistent, immutable view. Counters are read under the same lock
    /// that `ingest` holds, so a snapshot never sees a half-applied event.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let in_flight = self.in_flight.load(Ordering::Relaxed);
        self.inner.lock().snapshot(&self.app_name, in_flight)
    }

    /// Wipe all aggregates and restart the uptime clock. Requests already
    /// in flight keep counting towards the gauge.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new(&self.limits);
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub(crate) fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_settled(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Named route buckets currently held (excludes `unmatched`).
    pub fn route_count(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Number of counters backing the latency histogram. Fixed at
    /// construction.
    pub fn latency_slots(&self) -> usize {
        self.inner.lock().latency.distinct_values()
    }

    pub fn recent_len(&self) -> usize {
        self.inner.lock().recent.len()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new(limits: &StoreLimits) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            latency: new_histogram(),
            latency_sum_us: 0,
            total_requests: 0,
            error_count: 0,
            cancelled_count: 0,
            bytes_out: 0,
            status_classes: [0; 5],
            status_codes: BTreeMap::new(),
            error_codes: HashMap::new(),
            routes: HashMap::new(),
            unmatched: RouteCounters::default(),
            route_overflow: 0,
            recent: VecDeque::with_capacity(limits.recent_events + 1),
            timeline: VecDeque::with_capacity(MAX_TIMELINE_POINTS + 1),
            current_window: None,
        }
    }

    fn ingest(&mut self, event: RequestEvent, limits: &StoreLimits) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let duration_us = u64::try_from(event.duration.as_micros()).unwrap_or(u64::MAX);
        let is_error = event.is_error();

        // ── Counters ────────────────────────────────────────────
        self.total_requests += 1;
        if is_error {
            self.error_count += 1;
        }
        if event.outcome == Outcome::Cancelled {
            self.cancelled_count += 1;
        }
        if let Some(bytes) = event.bytes_out {
            self.bytes_out = self.bytes_out.saturating_add(bytes);
        }
        self.status_classes[StatusClass::of(event.status_code).index()] += 1;
        *self.status_codes.entry(event.status_code).or_insert(0) += 1;

        if let Some(code) = &event.error_code {
            if let Some(n) = self.error_codes.get_mut(code) {
                *n += 1;
            } else if self.error_codes.len() < limits.max_error_codes {
                self.error_codes.insert(code.clone(), 1);
            } else {
                *self
                    .error_codes
                    .entry(OTHER_ERROR_CODE.to_owned())
                    .or_insert(0) += 1;
            }
        }

        // ── Histogram (clamp to ≥ 1 μs, saturate at the top) ────
        self.latency.saturating_record(duration_us.max(HIST_LOW));
        self.latency_sum_us = self.latency_sum_us.saturating_add(duration_us);

        // ── Per-route ───────────────────────────────────────────
        self.record_route(&event, duration_us, is_error, limits);

        // ── Timeline aggregation ────────────────────────────────
        self.push_to_timeline(elapsed_ms, duration_us, is_error);

        // ── Live request feed ───────────────────────────────────
        self.recent.push_back(RecentRequest {
            id: event.id,
            method: event.method,
            route: event.route,
            status_code: event.status_code,
            duration_ms: duration_us as f64 / 1_000.0,
            timestamp: event.timestamp,
            error_code: event.error_code,
        });
        while self.recent.len() > limits.recent_events {
            self.recent.pop_front();
        }
    }

    fn record_route(
        &mut self,
        event: &RequestEvent,
        duration_us: u64,
        is_error: bool,
        limits: &StoreLimits,
    ) {
        if event.route == UNMATCHED_ROUTE {
            self.unmatched.add(duration_us, is_error);
            return;
        }

        let key = RouteKey {
            method: event.method.clone(),
            route: event.route.clone(),
        };
        if let Some(counters) = self.routes.get_mut(&key) {
            counters.add(duration_us, is_error);
        } else if self.routes.len() < limits.max_routes {
            let mut counters = RouteCounters::default();
            counters.add(duration_us, is_error);
            self.routes.insert(key, counters);
        } else {
            self.route_overflow += 1;
            self.unmatched.add(duration_us, is_error);
        }
    }

    /// Bucket the sample into the current window, or roll over.
    fn push_to_timeline(&mut self, elapsed_ms: u64, duration_us: u64, is_error: bool) {
        let window_start = (elapsed_ms / TIMELINE_WINDOW_MS) * TIMELINE_WINDOW_MS;

        match &mut self.current_window {
            // Same window — accumulate
            Some(w) if w.window_start_ms == window_start => {
                w.sum_us = w.sum_us.saturating_add(duration_us);
                w.count += 1;
                w.errors += u64::from(is_error);
            }
            // New window (or very first sample) — finalize the old one
            _ => {
                let fresh = WindowAccumulator {
                    window_start_ms: window_start,
                    sum_us: duration_us,
                    count: 1,
                    errors: u64::from(is_error),
                };
                if let Some(old) = self.current_window.replace(fresh) {
                    self.timeline.push_back(old.to_point());
                    while self.timeline.len() > MAX_TIMELINE_POINTS {
                        self.timeline.pop_front();
                    }
                }
            }
        }
    }

    fn snapshot(&self, app_name: &str, in_flight: u64) -> MetricsSnapshot {
        let uptime_secs = self.started.elapsed().as_secs_f64();
        let rps = if uptime_secs > 0.0 {
            self.total_requests as f64 / uptime_secs
        } else {
            0.0
        };
        let error_rate = if self.total_requests > 0 {
            self.error_count as f64 / self.total_requests as f64
        } else {
            0.0
        };

        let status_classes = StatusClass::ALL
            .iter()
            .map(|c| (c.as_str().to_owned(), self.status_classes[c.index()]))
            .collect();

        let mut routes: Vec<RouteStats> = self
            .routes
            .iter()
            .map(|(k, c)| c.to_stats(&k.method, &k.route))
            .collect();
        if self.unmatched.count > 0 {
            routes.push(self.unmatched.to_stats("*", UNMATCHED_ROUTE));
        }
        routes.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.route.cmp(&b.route))
                .then_with(|| a.method.cmp(&b.method))
        });

        // Include the current (partial) window in the timeline
        let mut timeline: Vec<TimelinePoint> = self.timeline.iter().cloned().collect();
        if let Some(w) = &self.current_window {
            timeline.push(w.to_point());
        }

        MetricsSnapshot {
            app_name: app_name.to_owned(),
            started_at: self.started_at,
            generated_at: Utc::now(),
            uptime_secs,
            total_requests: self.total_requests,
            error_count: self.error_count,
            cancelled_count: self.cancelled_count,
            in_flight,
            bytes_out: self.bytes_out,
            requests_per_sec: rps,
            error_rate,
            latency: PercentileSet::from_histogram(&self.latency, self.latency_sum_us),
            histogram: Self::compute_distribution(&self.latency),
            status_classes,
            status_codes: self.status_codes.clone(),
            error_codes: self
                .error_codes
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            routes,
            route_overflow: self.route_overflow,
            recent: self.recent.iter().cloned().collect(),
            timeline,
        }
    }

    // ── Distribution histogram ──────────────────────────────────

    /// Non-cumulative counts per [`BUCKET_BOUNDS_MS`] bucket plus an
    /// overflow bucket. Every bucket is present so the shape is stable.
    fn compute_distribution(hist: &Histogram<u64>) -> Vec<LatencyBucket> {
        let bounds_us: Vec<u64> = BUCKET_BOUNDS_MS
            .iter()
            .map(|ms| (ms * 1_000.0) as u64)
            .collect();
        let mut counts = vec![0u64; bounds_us.len() + 1];

        // Walk every recorded value in the histogram and bucket it
        for iv in hist.iter_recorded() {
            // Lowest equivalent, so a sample exactly on a bound stays in that bucket
            let val = hist.lowest_equivalent(iv.value_iterated_to());
            // binary_search gives us the first boundary >= val
            let idx = match bounds_us.binary_search(&val) {
                Ok(i) => i,
                Err(i) => i,
            };
            counts[idx] += iv.count_at_value();
        }

        BUCKET_BOUNDS_MS
            .iter()
            .map(|&ms| Some(ms))
            .chain(std::iter::once(None))
            .zip(counts)
            .map(|(upper_ms, count)| LatencyBucket { upper_ms, count })
            .collect()
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}
