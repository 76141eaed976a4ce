//! Topic-based publish/subscribe bus
//!
//! Subscribers are stored with their input queue, so delivery is a plain
//! enqueue and never waits on the subscriber's worker. Publication records
//! are informational only and hold no strong reference to the last value.

use dashmap::DashMap;
use parking_lot::RwLock;
use relaygate_core::{Message, Origin, Value, WeakValue, WorkItem, WorkQueue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Subscriber {
    plugin: String,
    queue: Arc<WorkQueue>,
}

#[derive(Debug, Clone)]
struct Publication {
    description: String,
    last_value: Option<WeakValue>,
    last_update: i64,
}

/// Read-only view of a publication record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationInfo {
    /// Fully-qualified name
    pub fq_name: String,
    /// Description from the publisher's settings
    pub description: String,
    /// Unix timestamp of the last publish, 0 if never published
    pub last_update: i64,
    /// Rendered last value, if still alive
    pub last_value: Option<String>,
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers the message was queued for
    pub delivered: usize,
    /// Subscribers whose queue refused the message
    pub failed: usize,
}

impl Delivery {
    /// Whether no subscriber was missed
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Fan-out bus keyed by fq_name
#[derive(Debug, Default)]
pub struct PubSubBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscriber>>>,
    publications: DashMap<String, BTreeMap<String, Publication>>,
    latest: DashMap<String, WeakValue>,
}

impl PubSubBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `plugin` to `fq_name`; returns `false` if already subscribed
    pub fn subscribe(&self, plugin: &str, queue: Arc<WorkQueue>, fq_name: &str) -> bool {
        let mut subs = self.subscriptions.write();
        let list = subs.entry(fq_name.to_string()).or_default();

        if list.iter().any(|s| s.plugin == plugin) {
            return false;
        }

        list.push(Subscriber {
            plugin: plugin.to_string(),
            queue,
        });
        debug!(plugin = %plugin, fq_name = %fq_name, "Subscribed");
        true
    }

    /// Remove one subscription; returns whether it existed
    pub fn unsubscribe(&self, plugin: &str, fq_name: &str) -> bool {
        let mut subs = self.subscriptions.write();
        let Some(list) = subs.get_mut(fq_name) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.plugin != plugin);
        let removed = list.len() != before;

        if list.is_empty() {
            subs.remove(fq_name);
        }
        if removed {
            debug!(plugin = %plugin, fq_name = %fq_name, "Unsubscribed");
        }
        removed
    }

    /// Remove every subscription owned by `plugin`; returns how many
    pub fn unsubscribe_all(&self, plugin: &str) -> usize {
        let mut subs = self.subscriptions.write();
        let mut removed = 0;

        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.plugin != plugin);
            removed += before - list.len();
            !list.is_empty()
        });

        removed
    }

    /// Deliver `value` to every subscriber of `fq_name`, in subscription order
    pub fn publish(&self, origin: &Origin, fq_name: &str, value: &Value) -> Delivery {
        let subscribers: Vec<Subscriber> = self
            .subscriptions
            .read()
            .get(fq_name)
            .cloned()
            .unwrap_or_default();

        let mut delivery = Delivery::default();
        for sub in &subscribers {
            let message = Message::new(fq_name, value.clone(), origin.clone());
            match sub.queue.enqueue(WorkItem::Message(message)) {
                Ok(()) => delivery.delivered += 1,
                Err(rejected) => {
                    warn!(
                        fq_name = %fq_name,
                        subscriber = %sub.plugin,
                        reason = %rejected.reason,
                        "Message not delivered"
                    );
                    delivery.failed += 1;
                }
            }
        }

        self.record_publish(&origin.plugin, fq_name, value);
        delivery
    }

    fn record_publish(&self, plugin: &str, fq_name: &str, value: &Value) {
        self.latest.insert(fq_name.to_string(), value.downgrade());

        if let Some(mut records) = self.publications.get_mut(plugin) {
            if let Some(record) = records.get_mut(fq_name) {
                record.last_value = Some(value.downgrade());
                record.last_update = chrono::Utc::now().timestamp();
            }
        }
    }

    /// Record or update publication metadata, without delivering anything
    pub fn add_publication(&self, plugin: &str, fq_name: &str, description: &str) {
        let mut records = self.publications.entry(plugin.to_string()).or_default();
        records
            .entry(fq_name.to_string())
            .and_modify(|p| p.description = description.to_string())
            .or_insert_with(|| Publication {
                description: description.to_string(),
                last_value: None,
                last_update: 0,
            });
    }

    /// Drop every publication record of `plugin`
    pub fn remove_publications(&self, plugin: &str) {
        self.publications.remove(plugin);
    }

    /// Publication records of `plugin`, ordered by fq_name
    pub fn list_publications(&self, plugin: &str) -> Vec<PublicationInfo> {
        let Some(records) = self.publications.get(plugin) else {
            return Vec::new();
        };

        records
            .iter()
            .map(|(fq_name, p)| PublicationInfo {
                fq_name: fq_name.clone(),
                description: p.description.clone(),
                last_update: p.last_update,
                last_value: p
                    .last_value
                    .as_ref()
                    .and_then(WeakValue::upgrade)
                    .map(|v| v.render()),
            })
            .collect()
    }

    /// Whether `plugin` has any publication record
    pub fn has_publications(&self, plugin: &str) -> bool {
        self.publications.contains_key(plugin)
    }

    /// Most recent value published under `fq_name`, if still alive
    pub fn latest(&self, fq_name: &str) -> Option<Value> {
        self.latest.get(fq_name).and_then(|w| w.upgrade())
    }

    /// Every fq_name with its subscribers in delivery order, ordered by fq_name
    pub fn subscriptions(&self) -> Vec<(String, Vec<String>)> {
        let subs = self.subscriptions.read();
        let ordered: BTreeMap<&String, &Vec<Subscriber>> = subs.iter().collect();
        ordered
            .into_iter()
            .map(|(fq, list)| (fq.clone(), list.iter().map(|s| s.plugin.clone()).collect()))
            .collect()
    }

    /// fq_names `plugin` is subscribed to, ordered
    pub fn subscriptions_of(&self, plugin: &str) -> Vec<String> {
        let subs = self.subscriptions.read();
        let mut names: Vec<String> = subs
            .iter()
            .filter(|(_, list)| list.iter().any(|s| s.plugin == plugin))
            .map(|(fq, _)| fq.clone())
            .collect();
        names.sort();
        names
    }

    /// Subscribers of `fq_name` in delivery order
    pub fn subscribers(&self, fq_name: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .get(fq_name)
            .map(|list| list.iter().map(|s| s.plugin.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::Dequeued;

    fn origin() -> Origin {
        Origin::new("Router", "builtin:passthrough")
    }

    fn drain_messages(queue: &WorkQueue) -> Vec<Message> {
        queue
            .drain()
            .into_iter()
            .filter_map(|item| match item {
                WorkItem::Message(m) => Some(m),
                WorkItem::Packet(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = PubSubBus::new();
        let q = Arc::new(WorkQueue::default());
        assert!(bus.subscribe("Stats", Arc::clone(&q), "topic"));
        assert!(!bus.subscribe("Stats", Arc::clone(&q), "topic"));

        let delivery = bus.publish(&origin(), "topic", &Value::new(1u32));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(drain_messages(&q).len(), 1);
    }

    #[test]
    fn test_publish_without_subscribers_leaks_nothing() {
        let bus = PubSubBus::new();
        let v = Value::new("hello".to_string());
        let delivery = bus.publish(&origin(), "nobody.listens", &v);
        assert_eq!(delivery, Delivery::default());
        assert_eq!(v.ref_count(), 1);
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let bus = PubSubBus::new();
        let a = Arc::new(WorkQueue::default());
        let b = Arc::new(WorkQueue::default());
        bus.subscribe("A", Arc::clone(&a), "topic");
        bus.subscribe("B", Arc::clone(&b), "topic");
        assert_eq!(bus.subscribers("topic"), vec!["A", "B"]);

        let v = Value::new(5i64);
        bus.publish(&origin(), "topic", &v);
        assert_eq!(v.ref_count(), 3);

        let msg = match a.dequeue(None) {
            Dequeued::Item(WorkItem::Message(m)) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(msg.fq_name, "topic");
        assert_eq!(msg.origin.plugin, "Router");
        drop(msg);
        drop(b.drain());
        assert_eq!(v.ref_count(), 1);
    }

    #[test]
    fn test_failed_delivery_counted() {
        let bus = PubSubBus::new();
        let q = Arc::new(WorkQueue::default());
        bus.subscribe("A", Arc::clone(&q), "topic");
        q.close();

        let v = Value::new(1u8);
        let delivery = bus.publish(&origin(), "topic", &v);
        assert_eq!(delivery.failed, 1);
        assert!(!delivery.is_complete());
        assert_eq!(v.ref_count(), 1);
    }

    #[test]
    fn test_unsubscribe_all() {
        let bus = PubSubBus::new();
        let q = Arc::new(WorkQueue::default());
        let other = Arc::new(WorkQueue::default());
        bus.subscribe("A", Arc::clone(&q), "one");
        bus.subscribe("A", Arc::clone(&q), "two");
        bus.subscribe("B", Arc::clone(&other), "two");

        assert_eq!(bus.subscriptions_of("A"), vec!["one", "two"]);
        assert_eq!(bus.unsubscribe_all("A"), 2);
        assert!(bus.subscriptions_of("A").is_empty());
        assert_eq!(
            bus.subscriptions(),
            vec![("two".to_string(), vec!["B".to_string()])]
        );
    }

    #[test]
    fn test_unsubscribe_single() {
        let bus = PubSubBus::new();
        let q = Arc::new(WorkQueue::default());
        bus.subscribe("A", Arc::clone(&q), "one");
        assert!(bus.unsubscribe("A", "one"));
        assert!(!bus.unsubscribe("A", "one"));
        assert!(bus.subscriptions().is_empty());
    }

    #[test]
    fn test_publication_records() {
        let bus = PubSubBus::new();
        bus.add_publication("Router", "Router.routed", "Packets routed");

        let before = bus.list_publications("Router");
        assert_eq!(before[0].last_update, 0);
        assert!(before[0].last_value.is_none());

        let v = Value::new(12u64);
        bus.publish(&origin(), "Router.routed", &v);

        let after = bus.list_publications("Router");
        assert!(after[0].last_update > 0);
        assert_eq!(after[0].last_value.as_deref(), Some("12"));
        assert_eq!(bus.latest("Router.routed").map(|v| v.render()), Some("12".to_string()));

        drop(v);
        assert!(bus.latest("Router.routed").is_none());
        assert!(bus.list_publications("Router")[0].last_value.is_none());

        bus.remove_publications("Router");
        assert!(!bus.has_publications("Router"));
    }
}
