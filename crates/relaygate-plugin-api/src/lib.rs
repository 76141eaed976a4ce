//! # Relaygate Plugin API
//!
//! SDK for writing relaygate plugins. A plugin implements [`Plugin`], talks
//! to the gateway through the [`PluginHost`] it receives at construction, and
//! is shipped either as a statically linked constructor or as a dynamic
//! module exporting the entry points generated by [`declare_plugin!`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use relaygate_plugin_api::prelude::*;
//!
//! #[derive(Debug)]
//! struct Forwarder {
//!     host: Host,
//! }
//!
//! impl Plugin for Forwarder {
//!     fn process_packet(&mut self, packet: &Packet) -> bool {
//!         match self.host.default_output() {
//!             Some(out) => self.host.forward_packet(out, packet),
//!             None => {
//!                 self.host.drop_packet(packet);
//!                 false
//!             }
//!         }
//!     }
//! }
//!
//! fn construct(host: Host) -> Box<dyn Plugin> {
//!     Box::new(Forwarder { host })
//! }
//! ```

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

#[allow(unsafe_code)]
pub mod abi;
pub mod error;
pub mod host;
pub mod plugin;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use abi::{
    create_instance, destroy_instance, panic_message, PluginConstructor, RawEntryPoints, ABI_VERSION,
};
pub use error::PluginError;
pub use host::{Host, PluginHost};
pub use plugin::{MainAction, Plugin};

pub use relaygate_config::PluginSettings;
pub use relaygate_core::{Message, Origin, Packet, Value};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::error::PluginError;
    pub use crate::host::{Host, PluginHost};
    pub use crate::plugin::{MainAction, Plugin};
    pub use relaygate_core::{Message, Packet, Value};
}
