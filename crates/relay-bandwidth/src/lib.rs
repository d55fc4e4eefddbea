//! Rolling byte-rate tracking per pipeline edge.
//!
//! Each [`BandwidthTracker`] keeps a short window of timestamped byte
//! samples and reports a rate over that window, the way `buffer_pool.rs`
//! keeps a small bounded pool alongside cumulative counters: cheap running
//! state for the hot path, a point-in-time snapshot for observability.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Snapshot of a tracker's current rate and totals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthStats {
    /// Bytes observed in the current window.
    pub window_bytes: u64,
    /// Window duration actually covered (may be shorter than the
    /// configured window if the edge is young).
    pub window_duration: Duration,
    /// Bytes per second over the window.
    pub bytes_per_sec: f64,
    /// Lifetime total bytes recorded.
    pub total_bytes: u64,
}

struct Sample {
    at: Instant,
    bytes: u64,
}

/// Tracks a rolling byte-rate for a single pipeline edge.
///
/// Samples older than `window` are dropped on the next `record` or
/// `stats` call. Not a fixed-size ring: the window is time-bounded, not
/// count-bounded, since edges can emit bursts of very different sizes.
pub struct BandwidthTracker {
    window: Duration,
    samples: Mutex<VecDeque<Sample>>,
    total_bytes: AtomicU64,
}

impl BandwidthTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
            total_bytes: AtomicU64::new(0),
        }
    }

    fn prune(&self, samples: &mut VecDeque<Sample>, now: Instant) {
        while let Some(front) = samples.front() {
            if now.duration_since(front.at) > self.window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record `bytes` observed just now.
    pub fn record(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        let now = Instant::now();
        let mut samples = self.samples.lock();
        self.prune(&mut samples, now);
        samples.push_back(Sample { at: now, bytes });
    }

    /// Current rolling rate in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        self.stats().bytes_per_sec
    }

    pub fn stats(&self) -> BandwidthStats {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        self.prune(&mut samples, now);

        let window_bytes: u64 = samples.iter().map(|s| s.bytes).sum();
        let window_duration = match samples.front() {
            Some(first) => now.duration_since(first.at),
            None => Duration::ZERO,
        };
        let bytes_per_sec = if window_duration.as_secs_f64() > 0.0 {
            window_bytes as f64 / window_duration.as_secs_f64()
        } else {
            0.0
        };

        BandwidthStats {
            window_bytes,
            window_duration,
            bytes_per_sec,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

impl Default for BandwidthTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Registry of one [`BandwidthTracker`] per named pipeline edge, created
/// lazily on first lookup.
pub struct BandwidthRegistry {
    trackers: Mutex<HashMap<String, std::sync::Arc<BandwidthTracker>>>,
    window: Duration,
}

impl BandwidthRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn get(&self, edge: &str) -> std::sync::Arc<BandwidthTracker> {
        if let Some(tracker) = self.trackers.lock().get(edge) {
            return tracker.clone();
        }
        self.trackers
            .lock()
            .entry(edge.to_string())
            .or_insert_with(|| std::sync::Arc::new(BandwidthTracker::new(self.window)))
            .clone()
    }

    pub fn record(&self, edge: &str, bytes: u64) {
        self.get(edge).record(bytes);
    }

    pub fn bytes_per_sec(&self, edge: &str) -> f64 {
        self.get(edge).bytes_per_sec()
    }

    pub fn snapshot(&self) -> HashMap<String, BandwidthStats> {
        self.trackers
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_record_accumulates_total() {
        let tracker = BandwidthTracker::new(Duration::from_secs(5));
        tracker.record(100);
        tracker.record(200);
        assert_eq!(tracker.total_bytes(), 300);
    }

    #[test]
    fn test_rate_reflects_window_bytes() {
        let tracker = BandwidthTracker::new(Duration::from_millis(200));
        tracker.record(1000);
        sleep(Duration::from_millis(50));
        tracker.record(1000);
        let stats = tracker.stats();
        assert_eq!(stats.window_bytes, 2000);
        assert!(stats.bytes_per_sec > 0.0);
    }

    #[test]
    fn test_samples_outside_window_are_pruned() {
        let tracker = BandwidthTracker::new(Duration::from_millis(30));
        tracker.record(500);
        sleep(Duration::from_millis(50));
        tracker.record(500);
        let stats = tracker.stats();
        // the first sample should have aged out of the window
        assert_eq!(stats.window_bytes, 500);
        assert_eq!(stats.total_bytes, 1000);
    }

    #[test]
    fn test_registry_isolates_by_edge() {
        let registry = BandwidthRegistry::new(Duration::from_secs(5));
        registry.record("edge-a", 1000);
        registry.record("edge-b", 1);
        assert_eq!(registry.get("edge-a").total_bytes(), 1000);
        assert_eq!(registry.get("edge-b").total_bytes(), 1);
    }

    #[test]
    fn test_snapshot_reports_all_edges() {
        let registry = BandwidthRegistry::new(Duration::from_secs(5));
        registry.record("edge-a", 10);
        registry.record("edge-b", 20);
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["edge-a"].total_bytes, 10);
        assert_eq!(snap["edge-b"].total_bytes, 20);
    }
}
