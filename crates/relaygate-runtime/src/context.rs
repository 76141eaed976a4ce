//! Runtime side of [`PluginHost`]

use crate::services::Services;
use crate::stats::PluginStats;
use parking_lot::Mutex;
use relaygate_config::PluginSettings;
use relaygate_core::{Message, Origin, Packet, Value, WorkItem, WorkQueue};
use relaygate_plugin_api::PluginHost;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-plugin state handed to the plugin as its host
#[derive(Debug)]
pub struct PluginContext {
    name: String,
    module: String,
    settings: PluginSettings,
    outputs: Vec<String>,
    queue: Arc<WorkQueue>,
    stats: PluginStats,
    timeout: Mutex<Option<Duration>>,
    exit: AtomicBool,
    services: Arc<Services>,
}

impl PluginContext {
    pub(crate) fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        settings: PluginSettings,
        services: Arc<Services>,
    ) -> Self {
        let name = name.into();
        let outputs = settings.declared_outputs(&name);
        let timeout = settings.queue_timeout;
        let queue = Arc::new(WorkQueue::new(services.queue_policy()));

        Self {
            name,
            module: module.into(),
            settings,
            outputs,
            queue,
            stats: PluginStats::new(),
            timeout: Mutex::new(timeout),
            exit: AtomicBool::new(false),
            services,
        }
    }

    /// Input queue
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Counters
    pub fn stats(&self) -> &PluginStats {
        &self.stats
    }

    /// Shared services
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Current dequeue timeout
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    pub(crate) fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    fn origin(&self) -> Origin {
        Origin::new(&self.name, &self.module)
    }
}

impl PluginHost for PluginContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> &str {
        &self.module
    }

    fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn forward_packet(&self, output: &str, packet: &Packet) -> bool {
        if !self.outputs.iter().any(|o| o == output) {
            warn!(plugin = %self.name, output = %output, "Forward to undeclared output");
            return false;
        }

        let Some(queue) = self.services.queues().get(output) else {
            warn!(plugin = %self.name, output = %output, "Output plugin is not loaded");
            return false;
        };

        let packets = self.services.packets();
        packets.acquire(packet);

        match queue.enqueue(WorkItem::Packet(packet.clone())) {
            Ok(()) => {
                self.stats.record_out(packet.len());
                true
            }
            Err(rejected) => {
                warn!(
                    plugin = %self.name,
                    output = %output,
                    reason = %rejected.reason,
                    "Forward rejected"
                );
                drop(rejected);
                packets.release(packet);
                false
            }
        }
    }

    fn drop_packet(&self, packet: &Packet) {
        self.stats.record_drop();
        self.services.packets().record_drop(packet);
    }

    fn publish(&self, fq_name: &str, value: &Value) -> bool {
        self.services
            .bus()
            .publish(&self.origin(), fq_name, value)
            .is_complete()
    }

    fn publish_to(&self, plugin: &str, fq_name: &str, value: &Value) -> bool {
        let Some(queue) = self.services.queues().get(plugin) else {
            warn!(plugin = %self.name, target = %plugin, "Publish target is not loaded");
            return false;
        };

        let message = Message::new(fq_name, value.clone(), self.origin());
        match queue.enqueue(WorkItem::Message(message)) {
            Ok(()) => true,
            Err(rejected) => {
                warn!(
                    plugin = %self.name,
                    target = %plugin,
                    reason = %rejected.reason,
                    "Direct publish rejected"
                );
                false
            }
        }
    }

    fn subscribe(&self, fq_name: &str) -> bool {
        if !self
            .services
            .bus()
            .subscribe(&self.name, Arc::clone(&self.queue), fq_name)
        {
            debug!(plugin = %self.name, fq_name = %fq_name, "Already subscribed");
        }
        true
    }

    fn unsubscribe(&self, fq_name: &str) -> bool {
        self.services.bus().unsubscribe(&self.name, fq_name)
    }

    fn request(&self, fq_name: &str) -> Option<Value> {
        self.services.bus().latest(fq_name)
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
    use relaygate_config::OutputConfig;
    use relaygate_core::{OverflowPolicy, QueuePolicy};

    fn context(name: &str, outputs: &[&str], services: &Arc<Services>) -> PluginContext {
        let settings = PluginSettings {
            outputs: outputs.iter().map(|o| OutputConfig::to(*o)).collect(),
            ..PluginSettings::default()
        };
        let ctx = PluginContext::new(name, "builtin:test", settings, Arc::clone(services));
        services.queues().insert(name, Arc::clone(ctx.queue()));
        ctx
    }

    #[test]
    fn test_forward_takes_reference() {
        let services = Arc::new(Services::default());
        let a = context("A", &["B"], &services);
        let b = context("B", &[], &services);

        let p = Packet::new(vec![0u8; 32]);
        assert!(a.forward_packet("B", &p));
        assert_eq!(services.packets().ref_count(&p), 1);
        assert_eq!(services.packets().counters().packets_in, 1);
        assert_eq!(b.queue().len(), 1);
        assert_eq!(a.stats().snapshot().packets_out, 1);
    }

    #[test]
    fn test_forward_to_undeclared_output_leaves_packet_alone() {
        let services = Arc::new(Services::default());
        let a = context("A", &["B"], &services);
        let _c = context("C", &[], &services);

        let p = Packet::new(vec![0u8; 8]);
        assert!(!a.forward_packet("C", &p));
        assert!(!services.packets().is_tracked(&p));
        assert_eq!(a.stats().snapshot().packets_out, 0);
    }

    #[test]
    fn test_rejected_forward_releases_reference() {
        let services = Arc::new(Services::new(QueuePolicy::bounded(1, OverflowPolicy::Reject)));
        let a = context("A", &["B"], &services);
        let _b = context("B", &[], &services);

        let first = Packet::new(vec![1u8]);
        let second = Packet::new(vec![2u8]);
        assert!(a.forward_packet("B", &first));
        assert!(!a.forward_packet("B", &second));
        assert!(!services.packets().is_tracked(&second));
        assert_eq!(services.packets().counters().packets_out, 1);
    }

    #[test]
    fn test_publish_to_named_plugin() {
        let services = Arc::new(Services::default());
        let a = context("A", &[], &services);
        let b = context("B", &[], &services);

        assert!(a.publish_to("B", "A.direct", &Value::new(3u8)));
        assert!(!a.publish_to("Missing", "A.direct", &Value::new(3u8)));
        assert_eq!(b.queue().len(), 1);
    }

    #[test]
    fn test_set_timeout_and_exit() {
        let services = Arc::new(Services::default());
        let a = context("A", &[], &services);
        assert!(a.timeout().is_none());
        a.set_timeout(Some(Duration::from_millis(5)));
        assert_eq!(a.timeout(), Some(Duration::from_millis(5)));
        assert!(!a.exit_requested());
        a.request_exit();
        assert!(a.exit_requested());
    }
}
