//! Name and thread lookup tables shared across the runtime

use dashmap::DashMap;
use relaygate_core::WorkQueue;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Plugin name to input queue
#[derive(Debug, Clone, Default)]
pub struct QueueDirectory {
    queues: Arc<DashMap<String, Arc<WorkQueue>>>,
}

impl QueueDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue, returning `false` if the name is taken
    pub fn insert(&self, name: &str, queue: Arc<WorkQueue>) -> bool {
        match self.queues.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(queue);
                true
            }
        }
    }

    /// Look up a queue
    pub fn get(&self, name: &str) -> Option<Arc<WorkQueue>> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    /// Remove a queue
    pub fn remove(&self, name: &str) -> Option<Arc<WorkQueue>> {
        self.queues.remove(name).map(|(_, q)| q)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }
}

/// Worker thread to plugin name
#[derive(Debug, Clone, Default)]
pub struct ThreadDirectory {
    threads: Arc<DashMap<ThreadId, String>>,
}

impl ThreadDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the calling thread as `plugin`'s worker
    pub fn register_current(&self, plugin: &str) -> ThreadId {
        let id = thread::current().id();
        self.threads.insert(id, plugin.to_string());
        id
    }

    /// Forget a worker thread
    pub fn remove(&self, id: ThreadId) {
        self.threads.remove(&id);
    }

    /// Plugin owning thread `id`
    pub fn plugin_of(&self, id: ThreadId) -> Option<String> {
        self.threads.get(&id).map(|n| n.value().clone())
    }

    /// Plugin owning the calling thread
    pub fn current_plugin(&self) -> Option<String> {
        self.plugin_of(thread::current().id())
    }

    /// Call `f` with the calling thread's plugin name, without cloning it
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&str>) -> R) -> R {
        match self.threads.get(&thread::current().id()) {
            Some(name) => f(Some(name.value().as_str())),
            None => f(None),
        }
    }
}
