//! Work items carried on plugin queues

use crate::packet::Packet;
use crate::value::Message;

/// Unit of work on a plugin queue
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// A shared handle to an in-flight packet
    Packet(Packet),
    /// A published value delivered to this plugin
    Message(Message),
}

/// Discriminant of a [`WorkItem`], for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemKind {
    /// Packet item
    Packet,
    /// Message item
    Message,
}

impl WorkItem {
    /// Which payload this item carries
    pub fn kind(&self) -> WorkItemKind {
        match self {
            WorkItem::Packet(_) => WorkItemKind::Packet,
            WorkItem::Message(_) => WorkItemKind::Message,
        }
    }

    /// The packet, if this is a packet item
    pub fn as_packet(&self) -> Option<&Packet> {
        match self {
            WorkItem::Packet(p) => Some(p),
            WorkItem::Message(_) => None,
        }
    }

    /// Consume the item, returning the packet if it carried one
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            WorkItem::Packet(p) => Some(p),
            WorkItem::Message(_) => None,
        }
    }
}

impl From<Packet> for WorkItem {
    fn from(packet: Packet) -> Self {
        WorkItem::Packet(packet)
    }
}

impl From<Message> for WorkItem {
    fn from(message: Message) -> Self {
        WorkItem::Message(message)
    }
}
