//! # Relaygate Monitor
//!
//! Control service for a running gateway:
//! - Line-oriented request/response protocol over TCP
//! - Forwarding graph, statistics and plugin settings get/set
//! - Publish/subscribe listing and live `pubsub_update` pushes
//! - Log forwarding to connected clients

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod handlers;
pub mod log;
pub mod protocol;
pub mod server;

pub use handlers::{log_push, pubsub_update, CommandHandler};
pub use log::{log_channel, LogReceiver, MonitorLogLayer, CORE_TAG, LOG_BACKLOG};
pub use protocol::{parse_responses, ParseState, Request, RequestParser, Response, DATA_TERMINATOR};
pub use server::{ControlServer, CLIENT_BACKLOG, MAX_LINE};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::log::{log_channel, MonitorLogLayer};
    pub use crate::protocol::{Request, Response};
    pub use crate::server::ControlServer;
}
