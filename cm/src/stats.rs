//! Transfer statistics collaborator

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives byte counts from the runtime
pub trait Stats: Send + Sync {
    fn bytes_sent(&self, protocol: &str, num: usize);

    fn bytes_received(&self, protocol: &str, num: usize);
}

/// Stats implementation that keeps running totals
#[derive(Debug, Default)]
pub struct CountingStats {
    sent: AtomicU64,
    received: AtomicU64,
}

impl CountingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Stats for CountingStats {
    fn bytes_sent(&self, _protocol: &str, num: usize) {
        self.sent.fetch_add(num as u64, Ordering::Relaxed);
    }

    fn bytes_received(&self, _protocol: &str, num: usize) {
        self.received.fetch_add(num as u64, Ordering::Relaxed);
    }
}
