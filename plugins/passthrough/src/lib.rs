//! # Passthrough Plugin
//!
//! Forwards every packet to the plugin's default output (the first entry of
//! `outputs`). Packets arriving at a passthrough without outputs are dropped.
//!
//! ## Settings
//!
//! ```yaml
//! outputs:
//!   - plugin: Egress
//! publish:
//!   - name: Relay.forwarded
//!     description: Packets forwarded so far
//! report_every: 100
//! ```
//!
//! With `report_every` set, the running forward count is published under
//! `<name>.forwarded` every that many packets.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use relaygate_plugin_api::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

/// Plugin-specific settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassthroughConfig {
    /// Publish the forward count every this many packets, 0 disables
    #[serde(default)]
    pub report_every: u64,
}

/// Forward-to-default-output plugin
#[derive(Debug)]
pub struct Passthrough {
    host: Host,
    config: PassthroughConfig,
    forwarded: u64,
    dropped: u64,
}

impl Passthrough {
    /// Create an instance bound to `host`
    pub fn new(host: Host) -> Self {
        Self {
            host,
            config: PassthroughConfig::default(),
            forwarded: 0,
            dropped: 0,
        }
    }

    fn counter_name(&self) -> String {
        format!("{}.forwarded", self.host.name())
    }
}

impl Plugin for Passthrough {
    fn init(&mut self) -> Result<(), PluginError> {
        let extra = serde_json::Value::Object(self.host.settings().extra.clone());
        self.config = serde_json::from_value(extra)
            .map_err(|e| PluginError::config(format!("Invalid passthrough settings: {e}")))?;

        match self.host.default_output() {
            Some(output) => debug!(output = %output, "Passthrough ready"),
            None => warn!(plugin = %self.host.name(), "No outputs declared, packets will be dropped"),
        }
        Ok(())
    }

    fn process_packet(&mut self, packet: &Packet) -> bool {
        let forwarded = match self.host.default_output() {
            Some(output) => self.host.forward_packet(output, packet),
            None => false,
        };

        if !forwarded {
            self.host.drop_packet(packet);
            self.dropped += 1;
            return false;
        }

        self.forwarded += 1;
        if self.config.report_every > 0 && self.forwarded % self.config.report_every == 0 {
            self.host
                .publish(&self.counter_name(), &Value::new(self.forwarded));
        }
        true
    }

    fn exit_handler(&mut self) {
        debug!(
            forwarded = self.forwarded,
            dropped = self.dropped,
            "Passthrough exiting"
        );
    }
}

/// Constructor registered as `builtin:passthrough`
pub fn construct(host: Host) -> Box<dyn Plugin> {
    Box::new(Passthrough::new(host))
}

#[cfg(feature = "dylib")]
relaygate_plugin_api::declare_plugin!(construct);
