//! Fulfill/reject counts and failure rates

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Packet outcome counters
#[derive(Debug)]
pub struct StatisticsTracker {
    fulfilled: AtomicU64,
    rejected: AtomicU64,
    window_size: usize,
    // true = rejected
    recent: Mutex<VecDeque<bool>>,
}

impl StatisticsTracker {
    /// Create new tracker keeping the last `window_size` outcomes
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            fulfilled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            window_size,
            recent: Mutex::new(VecDeque::with_capacity(window_size)),
        }
    }

    fn record(&self, rejected: bool) {
        let mut recent = self.recent.lock();
        if recent.len() == self.window_size {
            recent.pop_front();
        }
        recent.push_back(rejected);
    }

    /// A packet was fulfilled
    pub fn increment_fulfill_count(&self) {
        self.fulfilled.fetch_add(1, Ordering::SeqCst);
        self.record(false);
    }

    /// A packet was rejected
    pub fn increment_reject_count(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        self.record(true);
    }

    /// Fulfilled packets
    pub fn fulfill_count(&self) -> u64 {
        self.fulfilled.load(Ordering::SeqCst)
    }

    /// Rejected packets
    pub fn reject_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    /// All answered packets
    pub fn total_packets(&self) -> u64 {
        self.fulfill_count() + self.reject_count()
    }

    /// Rejected fraction over the whole payment (0.0 - 1.0)
    pub fn failure_percentage(&self) -> f64 {
        let total = self.total_packets();
        if total == 0 {
            0.0
        } else {
            self.reject_count() as f64 / total as f64
        }
    }

    /// Rejected fraction over the recent window (0.0 - 1.0)
    pub fn rolling_failure_percentage(&self) -> f64 {
        let recent = self.recent.lock();
        if recent.is_empty() {
            return 0.0;
        }
        let rejected = recent.iter().filter(|rejected| **rejected).count();
        rejected as f64 / recent.len() as f64
    }

    /// Outcomes in the recent window
    pub fn rolling_sample_size(&self) -> usize {
        self.recent.lock().len()
    }
}
