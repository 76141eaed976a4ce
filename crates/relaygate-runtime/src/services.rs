//! Process-wide services shared by every plugin

use crate::directory::{QueueDirectory, ThreadDirectory};
use crate::pubsub::PubSubBus;
use relaygate_core::{PacketOwnershipTable, QueuePolicy};
use std::time::{Duration, Instant};

/// Shared state reachable from every plugin context
#[derive(Debug)]
pub struct Services {
    packets: PacketOwnershipTable,
    bus: PubSubBus,
    queues: QueueDirectory,
    threads: ThreadDirectory,
    queue_policy: QueuePolicy,
    started_at: Instant,
}

impl Services {
    /// Create services with the given queue policy
    pub fn new(queue_policy: QueuePolicy) -> Self {
        Self::with_threads(queue_policy, ThreadDirectory::new())
    }

    /// Create services sharing an existing thread directory
    pub fn with_threads(queue_policy: QueuePolicy, threads: ThreadDirectory) -> Self {
        Self {
            packets: PacketOwnershipTable::new(),
            bus: PubSubBus::new(),
            queues: QueueDirectory::new(),
            threads,
            queue_policy,
            started_at: Instant::now(),
        }
    }

    /// Packet ownership table
    pub fn packets(&self) -> &PacketOwnershipTable {
        &self.packets
    }

    /// Publish/subscribe bus
    pub fn bus(&self) -> &PubSubBus {
        &self.bus
    }

    /// Name to queue map
    pub fn queues(&self) -> &QueueDirectory {
        &self.queues
    }

    /// Thread to plugin map
    pub fn threads(&self) -> &ThreadDirectory {
        &self.threads
    }

    /// Policy for new queues
    pub fn queue_policy(&self) -> QueuePolicy {
        self.queue_policy
    }

    /// Time since the services were created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}
