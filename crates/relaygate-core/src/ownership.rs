//! Process-wide ownership tracking for in-flight packets
//!
//! Every time a packet crosses a queue boundary the sender acquires a
//! reference here and the receiver releases it after processing. The table
//! keeps the packet alive while its count is non-zero and drops its handle
//! exactly once when the count returns to zero.

use crate::packet::{Packet, PacketId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Throughput and consistency counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    /// Distinct packets ever tracked
    pub total_packets: u64,
    /// Acquire calls
    pub total_refs: u64,
    /// Successful release calls
    pub total_unrefs: u64,
    /// Packets whose count reached zero
    pub total_frees: u64,
    /// Releases of untracked packets
    pub bad_unrefs: u64,
    /// Bytes entering the table
    pub bytes_in: u64,
    /// Bytes leaving the table
    pub bytes_out: u64,
    /// Bytes reported dropped by plugins
    pub bytes_dropped: u64,
    /// Packets entering the table
    pub packets_in: u64,
    /// Packets leaving the table
    pub packets_out: u64,
    /// Packets reported dropped by plugins
    pub packets_dropped: u64,
}

/// One row of [`PacketOwnershipTable::dump`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedPacket {
    /// Packet identity
    pub id: u64,
    /// Packet size in bytes
    pub len: usize,
    /// Outstanding references
    pub count: usize,
}

#[derive(Debug)]
struct Tracked {
    packet: Packet,
    count: usize,
}

#[derive(Debug, Default)]
struct TableState {
    tracked: HashMap<PacketId, Tracked>,
    counters: PacketCounters,
}

/// Reference-count map for in-flight packets
#[derive(Debug, Default)]
pub struct PacketOwnershipTable {
    state: Mutex<TableState>,
}

impl PacketOwnershipTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one reference on `packet`, tracking it if it was untracked
    pub fn acquire(&self, packet: &Packet) {
        let mut state = self.state.lock();
        state.counters.total_refs += 1;

        if let Some(entry) = state.tracked.get_mut(&packet.id()) {
            entry.count += 1;
            return;
        }

        state.tracked.insert(
            packet.id(),
            Tracked {
                packet: packet.clone(),
                count: 1,
            },
        );
        state.counters.total_packets += 1;
        state.counters.packets_in += 1;
        state.counters.bytes_in += packet.len() as u64;
    }

    /// Drop one reference on `packet`
    ///
    /// Returns `false` when the packet was not tracked. That case is counted
    /// and logged with the full list of tracked packets but is otherwise
    /// harmless.
    pub fn release(&self, packet: &Packet) -> bool {
        let id = packet.id();
        let freed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(entry) = state.tracked.get_mut(&id) else {
                state.counters.bad_unrefs += 1;
                let snapshot = Self::snapshot(state);
                drop(guard);
                Self::report_bad_release(id, &snapshot);
                return false;
            };

            state.counters.total_unrefs += 1;
            entry.count -= 1;
            if entry.count > 0 {
                return true;
            }

            let removed = state.tracked.remove(&id);
            state.counters.total_frees += 1;
            state.counters.packets_out += 1;
            state.counters.bytes_out += packet.len() as u64;
            removed
        };

        // Last table handle goes away outside the lock.
        drop(freed);
        true
    }

    fn report_bad_release(id: PacketId, tracked: &[TrackedPacket]) {
        for t in tracked {
            warn!(packet = t.id, len = t.len, count = t.count, "Tracked packet");
        }
        error!(
            packet = %id,
            tracked = tracked.len(),
            "Release of untracked packet"
        );
    }

    /// Record that a plugin dropped `packet`
    pub fn record_drop(&self, packet: &Packet) {
        let mut state = self.state.lock();
        state.counters.packets_dropped += 1;
        state.counters.bytes_dropped += packet.len() as u64;
    }

    /// Outstanding references on `packet`, 0 if untracked
    pub fn ref_count(&self, packet: &Packet) -> usize {
        self.state
            .lock()
            .tracked
            .get(&packet.id())
            .map(|t| t.count)
            .unwrap_or(0)
    }

    /// Whether `packet` is currently tracked
    pub fn is_tracked(&self, packet: &Packet) -> bool {
        self.state.lock().tracked.contains_key(&packet.id())
    }

    /// Number of tracked packets
    pub fn tracked_count(&self) -> usize {
        self.state.lock().tracked.len()
    }

    /// Sum of the sizes of tracked packets
    pub fn tracked_bytes(&self) -> u64 {
        self.state
            .lock()
            .tracked
            .values()
            .map(|t| t.packet.len() as u64)
            .sum()
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> PacketCounters {
        self.state.lock().counters
    }

    /// Every tracked packet, ordered by id
    pub fn dump(&self) -> Vec<TrackedPacket> {
        Self::snapshot(&self.state.lock())
    }

    fn snapshot(state: &TableState) -> Vec<TrackedPacket> {
        let mut rows: Vec<TrackedPacket> = state
            .tracked
            .iter()
            .map(|(id, t)| TrackedPacket {
                id: id.as_u64(),
                len: t.packet.len(),
                count: t.count,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// Log the counters, typically at shutdown
    pub fn log_summary(&self) {
        let c = self.counters();
        info!(
            total_packets = c.total_packets,
            total_refs = c.total_refs,
            total_unrefs = c.total_unrefs,
            total_frees = c.total_frees,
            bad_unrefs = c.bad_unrefs,
            bytes_in = c.bytes_in,
            bytes_out = c.bytes_out,
            bytes_dropped = c.bytes_dropped,
            packets_in = c.packets_in,
            packets_out = c.packets_out,
            packets_dropped = c.packets_dropped,
            still_tracked = self.tracked_count(),
            "Packet table summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_frees_once() {
        let table = PacketOwnershipTable::new();
        let p = Packet::new(vec![0u8; 100]);
        let weak = p.downgrade();

        table.acquire(&p);
        assert_eq!(table.ref_count(&p), 1);
        assert_eq!(table.counters().packets_in, 1);
        assert_eq!(table.counters().bytes_in, 100);

        table.acquire(&p);
        assert_eq!(table.ref_count(&p), 2);
        assert_eq!(table.counters().packets_in, 1);

        assert!(table.release(&p));
        assert!(table.is_tracked(&p));
        assert!(table.release(&p));
        assert!(!table.is_tracked(&p));

        let c = table.counters();
        assert_eq!(c.total_frees, 1);
        assert_eq!(c.packets_out, 1);
        assert_eq!(c.bytes_out, 100);

        drop(p);
        assert!(weak.is_freed());
    }

    #[test]
    fn test_table_keeps_packet_alive() {
        let table = PacketOwnershipTable::new();
        let p = Packet::new(vec![1u8; 8]);
        let weak = p.downgrade();
        table.acquire(&p);
        let probe = p.clone();
        drop(p);
        assert!(!weak.is_freed());
        table.release(&probe);
        drop(probe);
        assert!(weak.is_freed());
    }

    #[test]
    fn test_bad_release_is_counted() {
        let table = PacketOwnershipTable::new();
        let tracked = Packet::new(vec![1u8; 4]);
        let stray = Packet::new(vec![2u8; 4]);
        table.acquire(&tracked);

        assert!(!table.release(&stray));
        let c = table.counters();
        assert_eq!(c.bad_unrefs, 1);
        assert_eq!(c.total_unrefs, 0);
        assert_eq!(table.ref_count(&tracked), 1);
    }

    #[test]
    fn test_in_flight_bytes_balance() {
        let table = PacketOwnershipTable::new();
        let packets: Vec<Packet> = (1..=4).map(|n| Packet::new(vec![0u8; n * 10])).collect();
        for p in &packets {
            table.acquire(p);
        }
        table.release(&packets[1]);

        let c = table.counters();
        assert_eq!(c.bytes_in - c.bytes_out, table.tracked_bytes());
        assert_eq!(table.tracked_bytes(), 10 + 30 + 40);
    }

    #[test]
    fn test_record_drop_does_not_release() {
        let table = PacketOwnershipTable::new();
        let p = Packet::new(vec![0u8; 16]);
        table.acquire(&p);
        table.record_drop(&p);
        assert_eq!(table.ref_count(&p), 1);
        assert_eq!(table.counters().packets_dropped, 1);
        assert_eq!(table.counters().bytes_dropped, 16);
    }

    #[test]
    fn test_dump_sorted() {
        let table = PacketOwnershipTable::new();
        let a = Packet::new(vec![0u8; 1]);
        let b = Packet::new(vec![0u8; 2]);
        table.acquire(&b);
        table.acquire(&a);
        table.acquire(&a);
        let rows = table.dump();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, a.id().as_u64());
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].len, 2);
    }
}
