//! Services the runtime offers to a plugin instance

use relaygate_config::PluginSettings;
use relaygate_core::{Packet, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to the runtime services of one plugin
pub type Host = Arc<dyn PluginHost>;

/// Runtime services bound to one plugin
///
/// Plugin-facing operations report failure through their return value and
/// log the reason, they never panic.
pub trait PluginHost: Send + Sync + fmt::Debug {
    /// Plugin instance name
    fn name(&self) -> &str;

    /// Module the plugin was loaded from
    fn module(&self) -> &str;

    /// Parsed settings file
    fn settings(&self) -> &PluginSettings;

    /// Declared output names, in declaration order
    fn outputs(&self) -> &[String];

    /// First declared output
    fn default_output(&self) -> Option<&str> {
        self.outputs().first().map(String::as_str)
    }

    /// Queue `packet` on a declared output
    ///
    /// On failure the caller keeps responsibility for the packet.
    fn forward_packet(&self, output: &str, packet: &Packet) -> bool;

    /// Record that the plugin dropped `packet`
    fn drop_packet(&self, packet: &Packet);

    /// Fan `value` out to every subscriber of `fq_name`
    fn publish(&self, fq_name: &str, value: &Value) -> bool;

    /// Deliver `value` to one named plugin only
    fn publish_to(&self, plugin: &str, fq_name: &str, value: &Value) -> bool;

    /// Subscribe this plugin to `fq_name`
    fn subscribe(&self, fq_name: &str) -> bool;

    /// Drop this plugin's subscription to `fq_name`
    fn unsubscribe(&self, fq_name: &str) -> bool;

    /// Most recent live value published under `fq_name`
    fn request(&self, fq_name: &str) -> Option<Value>;

    /// Change the dispatch-loop dequeue timeout
    fn set_timeout(&self, timeout: Option<Duration>);

    /// Whether the runtime asked this plugin to stop
    fn exit_requested(&self) -> bool;
}
