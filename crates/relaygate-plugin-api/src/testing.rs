//! In-memory [`PluginHost`] for exercising plugins without a runtime

use crate::host::PluginHost;
use parking_lot::Mutex;
use relaygate_config::{OutputConfig, PluginSettings};
use relaygate_core::{Packet, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Records every call a plugin makes on its host
#[derive(Debug, Default)]
pub struct MockHost {
    name: String,
    settings: PluginSettings,
    outputs: Vec<String>,
    forwarded: Mutex<Vec<(String, Packet)>>,
    dropped: Mutex<Vec<Packet>>,
    published: Mutex<Vec<(Option<String>, String, Value)>>,
    subscriptions: Mutex<Vec<String>>,
    last_values: Mutex<HashMap<String, Value>>,
    timeout: Mutex<Option<Duration>>,
    exit: AtomicBool,
}

impl MockHost {
    /// Host for a plugin with no outputs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Host for a plugin declaring `outputs`, first one is the default
    pub fn with_outputs<I, S>(name: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let settings = PluginSettings {
            outputs: outputs
                .into_iter()
                .map(|o| OutputConfig::to(o.into()))
                .collect(),
            ..PluginSettings::default()
        };
        Self::with_settings(name, settings)
    }

    /// Host backed by explicit settings
    pub fn with_settings(name: impl Into<String>, settings: PluginSettings) -> Self {
        let name = name.into();
        let outputs = settings.declared_outputs(&name);
        Self {
            name,
            settings,
            outputs,
            ..Self::default()
        }
    }

    /// Packets forwarded so far, with their output
    pub fn forwarded(&self) -> Vec<(String, Packet)> {
        self.forwarded.lock().clone()
    }

    /// Packets dropped so far
    pub fn dropped(&self) -> Vec<Packet> {
        self.dropped.lock().clone()
    }

    /// Values published so far as `(target, fq_name, value)`
    pub fn published(&self) -> Vec<(Option<String>, String, Value)> {
        self.published.lock().clone()
    }

    /// Current subscriptions
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Timeout last set by the plugin
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    /// Flip the exit flag the plugin polls
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }
}

impl PluginHost for MockHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> &str {
        "mock"
    }

    fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn forward_packet(&self, output: &str, packet: &Packet) -> bool {
        if !self.outputs.iter().any(|o| o == output) {
            return false;
        }
        self.forwarded
            .lock()
            .push((output.to_string(), packet.clone()));
        true
    }

    fn drop_packet(&self, packet: &Packet) {
        self.dropped.lock().push(packet.clone());
    }

    fn publish(&self, fq_name: &str, value: &Value) -> bool {
        self.last_values
            .lock()
            .insert(fq_name.to_string(), value.clone());
        self.published
            .lock()
            .push((None, fq_name.to_string(), value.clone()));
        true
    }

    fn publish_to(&self, plugin: &str, fq_name: &str, value: &Value) -> bool {
        self.published.lock().push((
            Some(plugin.to_string()),
            fq_name.to_string(),
            value.clone(),
        ));
        true
    }

    fn subscribe(&self, fq_name: &str) -> bool {
        let mut subs = self.subscriptions.lock();
        if !subs.iter().any(|s| s == fq_name) {
            subs.push(fq_name.to_string());
        }
        true
    }

    fn unsubscribe(&self, fq_name: &str) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s != fq_name);
        subs.len() != before
    }

    fn request(&self, fq_name: &str) -> Option<Value> {
        self.last_values.lock().get(fq_name).cloned()
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout;
    }

    fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_rejects_undeclared_output() {
        let host = MockHost::with_outputs("Router", ["Dns", "Web"]);
        let p = Packet::new(vec![1u8]);
        assert_eq!(host.default_output(), Some("Dns"));
        assert!(host.forward_packet("Web", &p));
        assert!(!host.forward_packet("Nowhere", &p));
        assert_eq!(host.forwarded().len(), 1);
    }

    #[test]
    fn test_mock_subscriptions_idempotent() {
        let host = MockHost::new("Stats");
        host.subscribe("Router.routed");
        host.subscribe("Router.routed");
        assert_eq!(host.subscriptions().len(), 1);
        assert!(host.unsubscribe("Router.routed"));
        assert!(!host.unsubscribe("Router.routed"));
    }
}
