//! Per-plugin counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by a plugin's worker thread and its forward calls
#[derive(Debug, Default)]
pub struct PluginStats {
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl PluginStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet was taken off the queue
    pub fn record_in(&self, bytes: usize) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A packet was forwarded
    pub fn record_out(&self, bytes: usize) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A packet was dropped
    pub fn record_drop(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`PluginStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Packets received
    pub packets_in: u64,
    /// Packets forwarded
    pub packets_out: u64,
    /// Packets dropped
    pub packets_dropped: u64,
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes forwarded
    pub bytes_out: u64,
}

impl StatsSnapshot {
    /// Packets received but neither forwarded nor dropped
    ///
    /// A plugin that copies packets to several outputs forwards more than it
    /// receives, so this saturates at zero.
    pub fn packets_held(&self) -> u64 {
        if self.packets_in == 0 {
            return 0;
        }
        self.packets_in
            .saturating_sub(self.packets_out)
            .saturating_sub(self.packets_dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held() {
        let stats = PluginStats::new();
        assert_eq!(stats.snapshot().packets_held(), 0);

        for _ in 0..5 {
            stats.record_in(10);
        }
        stats.record_out(10);
        stats.record_drop();

        let snap = stats.snapshot();
        assert_eq!(snap.packets_held(), 3);
        assert_eq!(snap.bytes_in, 50);
    }

    #[test]
    fn test_held_saturates_for_fan_out() {
        let stats = PluginStats::new();
        stats.record_in(1);
        stats.record_out(1);
        stats.record_out(1);
        assert_eq!(stats.snapshot().packets_held(), 0);
    }
}
