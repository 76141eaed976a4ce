//! # Relaygate Core
//!
//! Core types shared by every relaygate crate:
//! - Packet buffers and published values (shared, reference-counted handles)
//! - Work items carried on plugin queues
//! - The blocking [`WorkQueue`] each plugin worker drains
//! - The process-wide [`PacketOwnershipTable`]
//! - Error types

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod item;
pub mod ownership;
pub mod packet;
pub mod queue;
pub mod value;

pub use error::{Error, Result};
pub use item::{WorkItem, WorkItemKind};
pub use ownership::{PacketCounters, PacketOwnershipTable, TrackedPacket};
pub use packet::{Packet, PacketId, WeakPacket};
pub use queue::{Dequeued, OverflowPolicy, QueuePolicy, RejectReason, Rejected, WorkQueue};
pub use value::{Message, Origin, Value, WeakValue};

pub use bytes::Bytes;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::item::WorkItem;
    pub use crate::ownership::PacketOwnershipTable;
    pub use crate::packet::Packet;
    pub use crate::queue::{Dequeued, QueuePolicy, WorkQueue};
    pub use crate::value::{Message, Origin, Value};
}
