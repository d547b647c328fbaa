use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

impl MetricSeriesSummary {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Histogram(HistogramSummary),
}

/// Histogram statistics. Values are durations in microseconds.
#[derive(Debug, Clone)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub count: u64,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // 1us .. 1h, three significant digits.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn summarize_histogram(h: &Histogram<u64>) -> HistogramSummary {
    let count = h.len();
    let has = count > 0;
    let q = |quantile| has.then(|| h.value_at_quantile(quantile) as f64);

    HistogramSummary {
        p50: q(0.50),
        p90: q(0.90),
        p95: q(0.95),
        p99: q(0.99),
        min: has.then(|| h.min() as f64),
        max: has.then(|| h.max() as f64),
        mean: has.then(|| h.mean()),
        count,
    }
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    // Gauges go negative transiently when decrements race increments across series.
    Gauge(Arc<AtomicI64>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Histogram => Self::Histogram(Arc::new(Mutex::new(new_default_histogram()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            Self::Counter(a) => MetricHandle::Counter(a.clone()),
            Self::Gauge(a) => MetricHandle::Gauge(a.clone()),
            Self::Histogram(a) => MetricHandle::Histogram(a.clone()),
        }
    }

    pub(crate) fn value(&self) -> MetricValue {
        match self {
            Self::Counter(a) => MetricValue::Counter(a.load(Ordering::Relaxed)),
            Self::Gauge(a) => MetricValue::Gauge(a.load(Ordering::Relaxed)),
            Self::Histogram(h) => MetricValue::Histogram(summarize_histogram(&h.lock())),
        }
    }
}

/// Write handle for a single series.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    /// Counters only accept positive deltas; gauges accept both signs.
    #[inline]
    pub fn add(&self, delta: i64) {
        match self {
            Self::Counter(c) => {
                if delta > 0 {
                    c.fetch_add(delta as u64, Ordering::Relaxed);
                }
            }
            Self::Gauge(g) => {
                g.fetch_add(delta, Ordering::Relaxed);
            }
            Self::Histogram(_) => {}
        }
    }

    #[inline]
    pub fn record(&self, value: Duration) {
        if let Self::Histogram(h) = self {
            let us: u64 = value.as_micros().try_into().unwrap_or(u64::MAX);
            let _ = h.lock().record(us.max(1));
        }
    }

    pub fn counter(&self) -> u64 {
        match self {
            Self::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge(&self) -> i64 {
        match self {
            Self::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_stats() {
        let s = summarize_histogram(&new_default_histogram());
        assert_eq!(s.count, 0);
        assert!(s.p50.is_none());
        assert!(s.min.is_none());
        assert!(s.mean.is_none());
    }

    #[test]
    fn handle_updates_by_kind() {
        let c = MetricStorage::new(MetricKind::Counter).handle();
        c.add(2);
        c.add(-5);
        c.add(3);
        assert_eq!(c.counter(), 5);

        let g = MetricStorage::new(MetricKind::Gauge).handle();
        g.add(10);
        g.add(-3);
        assert_eq!(g.gauge(), 7);

        let storage = MetricStorage::new(MetricKind::Histogram);
        let h = storage.handle();
        h.record(Duration::from_millis(10));
        h.record(Duration::ZERO);
        let MetricValue::Histogram(summary) = storage.value() else {
            panic!("expected histogram value");
        };
        assert_eq!(summary.count, 2);
        assert_eq!(summary.min, Some(1.0));
    }
}
