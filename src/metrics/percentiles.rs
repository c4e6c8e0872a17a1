use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Latency summary in milliseconds, read from a microsecond histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSet {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    /// Exact, tracked next to the histogram rather than derived from it
    pub sum_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
}

impl PercentileSet {
    /// Extract a full percentile set from an HdrHistogram of microseconds.
    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>, sum_us: u64) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        let ms = |us: u64| us as f64 / 1_000.0;
        Self {
            count: hist.len(),
            min_ms: ms(hist.min()),
            max_ms: ms(hist.max()),
            avg_ms: sum_us as f64 / hist.len() as f64 / 1_000.0,
            sum_ms: ms(sum_us),
            p50_ms: ms(hist.value_at_quantile(0.50)),
            p90_ms: ms(hist.value_at_quantile(0.90)),
            p95_ms: ms(hist.value_at_quantile(0.95)),
            p99_ms: ms(hist.value_at_quantile(0.99)),
            p999_ms: ms(hist.value_at_quantile(0.999)),
        }
    }

    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self {
            count: 0,
            min_ms: 0.0,
            max_ms: 0.0,
            avg_ms: 0.0,
            sum_ms: 0.0,
            p50_ms: 0.0,
            p90_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            p999_ms: 0.0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_is_all_zero() {
        let hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
        let set = PercentileSet::from_histogram(&hist, 0);
        assert!(!set.has_data());
        assert_eq!(set, PercentileSet::empty());
    }

    #[test]
    fn percentiles_are_within_a_tenth_of_a_percent() {
        let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
        let mut sum = 0;
        for us in 1..=10_000u64 {
            hist.record(us * 10).unwrap();
            sum += us * 10;
        }
        let set = PercentileSet::from_histogram(&hist, sum);
        assert_eq!(set.count, 10_000);
        assert!((set.p50_ms - 50.0).abs() <= 50.0 * 0.001 + 0.01);
        assert!((set.p99_ms - 99.0).abs() <= 99.0 * 0.001 + 0.01);
        assert!((set.avg_ms - 50.005).abs() < 1e-9);
        assert!(set.max_ms >= set.p999_ms);
    }
}
