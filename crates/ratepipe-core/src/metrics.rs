//! The metrics engine: per-rate-segment counters, latency samples, and a
//! concurrency histogram, aggregated into a running `all` segment (§3
//! "MetricsRegistry", §4.3 steps 1/8).
//!
//! Writers (the worker pool) take short-lived locks per update; readers
//! (the status task) take the same locks to build a [`crate::stats::Stats`]
//! snapshot. There is no lock-free fast path here — the update rate is
//! bounded by `worker_count`, not by request volume, so contention is low.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Started/finished/success/fail counters plus the raw latency samples
/// needed to compute mean and p95 (the original's `go-metrics` exponentially
/// decaying reservoir is replaced here with a plain sample vector — cheap at
/// this volume and exact rather than approximate).
#[derive(Default)]
pub struct MetricsItem {
    pub started: AtomicU64,
    pub finished: AtomicU64,
    pub success: AtomicU64,
    pub fail: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl MetricsItem {
    fn log_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn log_finish(&self, elapsed: Duration, success: bool) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fail.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies.lock().expect("latencies lock poisoned").push(elapsed);
    }

    /// `(mean, p95)` over every latency sample recorded so far.
    pub fn latency_summary(&self) -> (Duration, Duration) {
        let samples = self.latencies.lock().expect("latencies lock poisoned");
        if samples.is_empty() {
            return (Duration::ZERO, Duration::ZERO);
        }
        let mut sorted = samples.clone();
        sorted.sort();
        let mean_nanos: u128 = sorted.iter().map(|d| d.as_nanos()).sum::<u128>() / sorted.len() as u128;
        let p95_index = ((sorted.len() as f64 - 1.0) * 0.95).round() as usize;
        (Duration::from_nanos(mean_nanos as u64), sorted[p95_index])
    }

    pub fn count(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }
}

/// One rate-paced window: the interval between two consecutive rate changes
/// (or from start/last-change to now for the live segment).
pub struct RateSegment {
    pub id: u32,
    pub desired_rate: f64,
    pub start_time: Instant,
    end_time: Mutex<Option<Instant>>,
    pub total: MetricsItem,
    pub status: Mutex<HashMap<String, MetricsItem>>,
    concurrency_samples: Mutex<Vec<f64>>,
    pub missed_ticks: AtomicU64,
}

impl RateSegment {
    fn new(id: u32, desired_rate: f64) -> Self {
        RateSegment {
            id,
            desired_rate,
            start_time: Instant::now(),
            end_time: Mutex::new(None),
            total: MetricsItem::default(),
            status: Mutex::new(HashMap::new()),
            concurrency_samples: Mutex::new(Vec::new()),
            missed_ticks: AtomicU64::new(0),
        }
    }

    fn freeze(&self) {
        let mut end = self.end_time.lock().expect("end_time lock poisoned");
        if end.is_none() {
            *end = Some(Instant::now());
        }
    }

    pub fn duration(&self) -> Duration {
        match *self.end_time.lock().expect("end_time lock poisoned") {
            Some(end) => end.saturating_duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    pub fn actual_rate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.total.started.load(Ordering::Relaxed) as f64 / secs
        }
    }

    pub fn average_concurrency(&self) -> f64 {
        let samples = self.concurrency_samples.lock().expect("concurrency lock poisoned");
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    fn sample_concurrency(&self, busy: i64) {
        self.concurrency_samples
            .lock()
            .expect("concurrency lock poisoned")
            .push(busy as f64);
    }

    fn log_finish(&self, status: &str, elapsed: Duration, success: bool) {
        self.total.log_finish(elapsed, success);
        let mut map = self.status.lock().expect("status lock poisoned");
        map.entry(status.to_string())
            .or_default()
            .log_finish(elapsed, success);
    }
}

/// Shared, thread-safe home for every counter and histogram in the run,
/// mirroring the original's `metricsDef`.
pub struct MetricsRegistry {
    busy: AtomicI64,
    skipped: AtomicU64,
    worker_count: usize,
    pub all: RateSegment,
    segments: Mutex<Vec<RateSegment>>,
    next_segment_id: AtomicU64,
}

impl MetricsRegistry {
    /// Build a registry with its first segment already open at `initial_rate`.
    pub fn new(worker_count: usize, initial_rate: f64) -> Self {
        let registry = MetricsRegistry {
            busy: AtomicI64::new(0),
            skipped: AtomicU64::new(0),
            worker_count,
            all: RateSegment::new(0, initial_rate),
            segments: Mutex::new(Vec::new()),
            next_segment_id: AtomicU64::new(1),
        };
        registry
            .segments
            .lock()
            .expect("segments lock poisoned")
            .push(RateSegment::new(0, initial_rate));
        registry
    }

    /// Freeze the current segment and open a new one at `new_rate`. Returns
    /// the new segment's id.
    pub fn add_segment(&self, new_rate: f64) -> u32 {
        let mut segments = self.segments.lock().expect("segments lock poisoned");
        if let Some(current) = segments.last() {
            current.freeze();
        }
        let id = self.next_segment_id.fetch_add(1, Ordering::Relaxed) as u32;
        segments.push(RateSegment::new(id, new_rate));
        id
    }

    pub fn current_segment_id(&self) -> u32 {
        self.segments
            .lock()
            .expect("segments lock poisoned")
            .last()
            .map(|s| s.id)
            .unwrap_or(0)
    }

    pub fn log_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_miss(&self, segment_id: u32) {
        let segments = self.segments.lock().expect("segments lock poisoned");
        if let Some(seg) = segments.iter().find(|s| s.id == segment_id) {
            seg.missed_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a new in-flight request: increments `busy`, samples
    /// concurrency into both `all` and the active segment, and bumps the
    /// `started` counter on both (§4.3 step 1).
    pub fn log_start(&self, segment_id: u32) {
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.all.total.log_start();
        self.all.sample_concurrency(busy);
        let segments = self.segments.lock().expect("segments lock poisoned");
        if let Some(seg) = segments.iter().find(|s| s.id == segment_id) {
            seg.total.log_start();
            seg.sample_concurrency(busy);
        }
    }

    /// Record completion: decrements `busy`, updates `all` and the owning
    /// segment's total and per-status counters (§4.3 step 8).
    pub fn log_finish(&self, segment_id: u32, status: &str, elapsed: Duration, success: bool) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
        self.all.log_finish(status, elapsed, success);
        let segments = self.segments.lock().expect("segments lock poisoned");
        if let Some(seg) = segments.iter().find(|s| s.id == segment_id) {
            seg.log_finish(status, elapsed, success);
        }
    }

    pub fn busy(&self) -> i64 {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Snapshot every segment, oldest first, for rendering (§6 "Metrics
    /// snapshot").
    pub fn with_segments<R>(&self, f: impl FnOnce(&[RateSegment]) -> R) -> R {
        let segments = self.segments.lock().expect("segments lock poisoned");
        f(&segments)
    }
}
