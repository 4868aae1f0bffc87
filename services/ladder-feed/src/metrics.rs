//! Per-ladder metrics
//!
//! Counters for feed traffic, snapshot builds, backend lifecycle and
//! depth requests, exported as a flat map for logging or scraping.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::events::FeedMessage;

/// Metrics for one ladder instance.
pub struct LadderMetrics {
    // Feed traffic
    pub lines_parsed: AtomicU64,
    pub lines_malformed: AtomicU64,
    pub ladder_messages: AtomicU64,
    pub delta_messages: AtomicU64,
    pub trade_messages: AtomicU64,
    pub unknown_messages: AtomicU64,
    pub prints_recorded: AtomicU64,
    pub last_ping_ms: AtomicU64,

    // Snapshots
    pub snapshots_built: AtomicU64,
    pub snapshot_build_ns: Mutex<LatencyTracker>,

    // Backend lifecycle
    pub backend_starts: AtomicU64,
    pub backend_restarts: AtomicU64,
    pub backend_crashes: AtomicU64,
    pub watchdog_stalls: AtomicU64,

    // Depth requests
    pub shift_requests: AtomicU64,
    pub center_requests: AtomicU64,
}

impl LadderMetrics {
    pub fn new() -> Self {
        Self {
            lines_parsed: AtomicU64::new(0),
            lines_malformed: AtomicU64::new(0),
            ladder_messages: AtomicU64::new(0),
            delta_messages: AtomicU64::new(0),
            trade_messages: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            prints_recorded: AtomicU64::new(0),
            last_ping_ms: AtomicU64::new(0),
            snapshots_built: AtomicU64::new(0),
            snapshot_build_ns: Mutex::new(LatencyTracker::new(256)),
            backend_starts: AtomicU64::new(0),
            backend_restarts: AtomicU64::new(0),
            backend_crashes: AtomicU64::new(0),
            watchdog_stalls: AtomicU64::new(0),
            shift_requests: AtomicU64::new(0),
            center_requests: AtomicU64::new(0),
        }
    }

    /// Record a successfully parsed line.
    pub fn record_message(&self, message: &FeedMessage) {
        self.lines_parsed.fetch_add(1, Ordering::Relaxed);
        let counter = match message {
            FeedMessage::Trade(_) => &self.trade_messages,
            FeedMessage::Ladder(_) => &self.ladder_messages,
            FeedMessage::LadderDelta(_) => &self.delta_messages,
            FeedMessage::Unknown => &self.unknown_messages,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.lines_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_print(&self) {
        self.prints_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ping(&self, ping_ms: u64) {
        self.last_ping_ms.store(ping_ms, Ordering::Relaxed);
    }

    /// Record a snapshot built.
    pub fn record_snapshot(&self, build_ns: u64) {
        self.snapshots_built.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.snapshot_build_ns.lock() {
            tracker.record(build_ns);
        }
    }

    pub fn record_start(&self) {
        self.backend_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.backend_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crash(&self) {
        self.backend_crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall(&self) {
        self.watchdog_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shift_request(&self) {
        self.shift_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_center_request(&self) {
        self.center_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("lines_parsed".to_string(), self.lines_parsed.load(Ordering::Relaxed));
        m.insert("lines_malformed".to_string(), self.lines_malformed.load(Ordering::Relaxed));
        m.insert("ladder_messages".to_string(), self.ladder_messages.load(Ordering::Relaxed));
        m.insert("delta_messages".to_string(), self.delta_messages.load(Ordering::Relaxed));
        m.insert("trade_messages".to_string(), self.trade_messages.load(Ordering::Relaxed));
        m.insert("unknown_messages".to_string(), self.unknown_messages.load(Ordering::Relaxed));
        m.insert("prints_recorded".to_string(), self.prints_recorded.load(Ordering::Relaxed));
        m.insert("last_ping_ms".to_string(), self.last_ping_ms.load(Ordering::Relaxed));
        m.insert("snapshots_built".to_string(), self.snapshots_built.load(Ordering::Relaxed));
        m.insert("backend_starts".to_string(), self.backend_starts.load(Ordering::Relaxed));
        m.insert("backend_restarts".to_string(), self.backend_restarts.load(Ordering::Relaxed));
        m.insert("backend_crashes".to_string(), self.backend_crashes.load(Ordering::Relaxed));
        m.insert("watchdog_stalls".to_string(), self.watchdog_stalls.load(Ordering::Relaxed));
        m.insert("shift_requests".to_string(), self.shift_requests.load(Ordering::Relaxed));
        m.insert("center_requests".to_string(), self.center_requests.load(Ordering::Relaxed));
        if let Ok(tracker) = self.snapshot_build_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("snapshot_build_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("snapshot_build_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for LadderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let n = sorted.len();
        let rank = (p.min(100) * n).div_ceil(100).max(1);
        Some(sorted[rank.min(n) - 1])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
