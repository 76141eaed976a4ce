//! Shared packet buffers

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique packet identity, used as the ownership table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u64);

impl PacketId {
    fn next() -> Self {
        Self(NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt#{}", self.0)
    }
}

#[derive(Debug)]
struct PacketBuffer {
    id: PacketId,
    data: Bytes,
}

/// Shared handle to an in-flight packet buffer
///
/// Cloning the handle shares the buffer; the bytes are freed when the last
/// handle is dropped. Every queue holding the packet holds one handle, and
/// the [`PacketOwnershipTable`](crate::PacketOwnershipTable) holds one more
/// while the packet is tracked.
#[derive(Debug, Clone)]
pub struct Packet {
    inner: Arc<PacketBuffer>,
}

impl Packet {
    /// Wrap raw bytes into a fresh, untracked packet
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(PacketBuffer {
                id: PacketId::next(),
                data: data.into(),
            }),
        }
    }

    /// Packet identity
    pub fn id(&self) -> PacketId {
        self.inner.id
    }

    /// Raw packet bytes
    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// New packet with its own identity over the same bytes
    ///
    /// No bytes are copied; `Bytes` is immutable and reference counted. The
    /// result is tracked separately in the ownership table.
    pub fn duplicate(&self) -> Self {
        Self {
            inner: Arc::new(PacketBuffer {
                id: PacketId::next(),
                data: self.inner.data.clone(),
            }),
        }
    }

    /// Number of live handles to this buffer
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Non-owning reference, used to observe when the buffer is freed
    pub fn downgrade(&self) -> WeakPacket {
        WeakPacket {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same buffer
    pub fn ptr_eq(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Non-owning packet reference
#[derive(Debug, Clone)]
pub struct WeakPacket {
    id: PacketId,
    inner: Weak<PacketBuffer>,
}

impl WeakPacket {
    /// Identity of the referenced packet
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Whether the buffer has been freed
    pub fn is_freed(&self) -> bool {
        self.inner.strong_count() == 0
    }

    /// Recover a handle if the buffer is still alive
    pub fn upgrade(&self) -> Option<Packet> {
        self.inner.upgrade().map(|inner| Packet { inner })
    }
}
