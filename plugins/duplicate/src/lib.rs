//! # Duplicate Plugin
//!
//! Copies every packet to each declared output. All copies share the same
//! buffer; each output holds its own reference until its worker is done.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use relaygate_plugin_api::prelude::*;
use tracing::{debug, warn};

/// Fan-out-to-every-output plugin
#[derive(Debug)]
pub struct Duplicate {
    host: Host,
    copies: u64,
    failures: u64,
}

impl Duplicate {
    /// Create an instance bound to `host`
    pub fn new(host: Host) -> Self {
        Self {
            host,
            copies: 0,
            failures: 0,
        }
    }
}

impl Plugin for Duplicate {
    fn init(&mut self) -> Result<(), PluginError> {
        if self.host.outputs().is_empty() {
            warn!(plugin = %self.host.name(), "No outputs declared, packets will be dropped");
        }
        Ok(())
    }

    fn process_packet(&mut self, packet: &Packet) -> bool {
        let mut delivered = 0usize;
        for output in self.host.outputs() {
            if self.host.forward_packet(output, packet) {
                delivered += 1;
            } else {
                self.failures += 1;
            }
        }

        if delivered == 0 {
            self.host.drop_packet(packet);
            return false;
        }

        self.copies += delivered as u64;
        true
    }

    fn exit_handler(&mut self) {
        debug!(copies = self.copies, failures = self.failures, "Duplicate exiting");
    }
}

/// Constructor registered as `builtin:duplicate`
pub fn construct(host: Host) -> Box<dyn Plugin> {
    Box::new(Duplicate::new(host))
}

#[cfg(feature = "dylib")]
relaygate_plugin_api::declare_plugin!(construct);
