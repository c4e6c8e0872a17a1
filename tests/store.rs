use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crashless::metrics::{MetricsStore, Outcome, RequestEvent, StoreLimits, UNMATCHED_ROUTE};
use crashless::RequestId;

fn event(route: String, status_code: u16, duration: Duration) -> RequestEvent {
    let error_code = (status_code >= 500).then(|| "INTERNAL_ERROR".to_owned());
    RequestEvent {
        id: RequestId::new(),
        method: "GET".into(),
        route,
        status_code,
        duration,
        timestamp: Utc::now(),
        outcome: if error_code.is_some() {
            Outcome::Failed
        } else {
            Outcome::Completed
        },
        error_code,
        bytes_out: Some(128),
    }
}

#[test]
fn memory_stays_bounded_under_route_explosion() {
    let limits = StoreLimits {
        max_routes: 1_000,
        max_error_codes: 10,
        recent_events: 100,
    };
    let store = MetricsStore::new("bounded", limits);
    let latency_slots = store.latency_slots();

    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..1_000_000u64 {
        let route = format!("/items/{}", i % 100_000);
        let status = if rng.gen_ratio(1, 50) { 500 } else { 200 };
        let duration = Duration::from_micros(rng.gen_range(50..2_000_000));
        store.ingest(event(route, status, duration));
    }

    assert_eq!(store.route_count(), 1_000);
    assert_eq!(store.latency_slots(), latency_slots);
    assert_eq!(store.recent_len(), 100);

    let snap = store.snapshot();
    assert_eq!(snap.total_requests, 1_000_000);
    assert_eq!(snap.routes.len(), 1_001);
    assert!(snap.timeline.len() <= 301);

    let routed: u64 = snap.routes.iter().map(|r| r.count).sum();
    assert_eq!(routed, 1_000_000);
    let unmatched = snap
        .routes
        .iter()
        .find(|r| r.route == UNMATCHED_ROUTE)
        .unwrap();
    assert_eq!(unmatched.count, snap.route_overflow);

    // Percentiles stay sane at volume
    let l = &snap.latency;
    assert!(l.min_ms <= l.p50_ms && l.p50_ms <= l.p99_ms && l.p99_ms <= l.max_ms);
    assert!(l.max_ms <= 2_000.0 * 1.001);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_ingest_loses_nothing() {
    const N: u64 = 2_000;
    let store = Arc::new(MetricsStore::new("concurrent", StoreLimits::default()));

    let mut handles = Vec::with_capacity(N as usize);
    for i in 0..N {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let status = if i % 10 == 0 { 500 } else { 200 };
            store.ingest(event(
                format!("/r/{}", i % 7),
                status,
                Duration::from_millis(i % 100),
            ));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let snap = store.snapshot();
    assert_eq!(snap.total_requests, N);
    assert_eq!(snap.error_count, N / 10);
    assert_eq!(snap.status_classes["2xx"] + snap.status_classes["5xx"], N);
    assert_eq!(snap.routes.iter().map(|r| r.count).sum::<u64>(), N);
    assert_eq!(snap.latency.count, N);
}

#[test]
fn snapshots_taken_during_ingest_are_consistent() {
    let store = Arc::new(MetricsStore::new("consistent", StoreLimits::default()));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let store = store.clone();
            scope.spawn(move || {
                for _ in 0..5_000 {
                    store.ingest(event("/x".into(), 503, Duration::from_millis(1)));
                }
            });
        }
        let reader = store.clone();
        scope.spawn(move || {
            for _ in 0..200 {
                let snap = reader.snapshot();
                // Every event is a 5xx error; the three views must agree
                assert_eq!(snap.total_requests, snap.error_count);
                assert_eq!(snap.total_requests, snap.status_classes["5xx"]);
                assert_eq!(snap.total_requests, snap.latency.count);
            }
        });
    });

    assert_eq!(store.snapshot().total_requests, 20_000);
}
