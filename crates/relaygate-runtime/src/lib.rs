//! # Relaygate Runtime
//!
//! Plugin execution runtime with:
//! - Built-in and shared-library plugin modules
//! - One worker thread and input queue per plugin
//! - Packet forwarding with ownership tracking
//! - Topic-based publish/subscribe fan-out
//! - Graceful shutdown with signal handling

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod directory;
pub mod gateway;
pub mod handle;
pub mod logging;
#[allow(unsafe_code)]
pub mod module;
pub mod pubsub;
pub mod registry;
pub mod services;
pub mod shutdown;
pub mod stats;

pub use context::PluginContext;
pub use directory::{QueueDirectory, ThreadDirectory};
pub use gateway::{Gateway, GatewayStats, PluginStatsRow};
pub use handle::{LoadSpec, PluginHandle, PluginState};
pub use logging::{env_filter, PluginLogFilter};
pub use module::{ModuleCatalog, PluginModule};
pub use pubsub::{Delivery, PubSubBus, PublicationInfo};
pub use registry::{LoadReport, PluginRegistry};
pub use services::Services;
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use stats::{PluginStats, StatsSnapshot};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::gateway::Gateway;
    pub use crate::module::ModuleCatalog;
    pub use crate::registry::PluginRegistry;
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
}
