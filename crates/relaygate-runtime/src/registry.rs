//! Plugin registry driving load and unload from configuration

use crate::handle::{LoadSpec, PluginHandle};
use crate::module::ModuleCatalog;
use crate::services::Services;
use dashmap::DashMap;
use parking_lot::Mutex;
use relaygate_config::{Config, PathResolver};
use relaygate_core::{Error, Result, WorkItem, WorkQueue};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name to plugin handle map, in load order
#[derive(Debug)]
pub struct PluginRegistry {
    services: Arc<Services>,
    catalog: ModuleCatalog,
    plugins: DashMap<String, Arc<PluginHandle>>,
    order: Mutex<Vec<String>>,
}

/// Result of [`PluginRegistry::load_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Plugins now running
    pub started: Vec<String>,
    /// Disabled entries
    pub skipped: Vec<String>,
    /// Entries that failed and were left out
    pub failed: Vec<String>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new(services: Arc<Services>, catalog: ModuleCatalog) -> Self {
        Self {
            services,
            catalog,
            plugins: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Shared services
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Built-in module catalog
    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Load and start every enabled plugin in declaration order
    ///
    /// All modules are loaded before any worker starts, so a plugin may
    /// forward to any other plugin from its first callback. A fatal error
    /// aborts when `halt_on_critical` is set; otherwise the failing plugin
    /// is skipped.
    pub fn load_all(&self, config: &Config, resolver: &PathResolver) -> Result<LoadReport> {
        let halt = config.gateway.halt_on_critical;
        let mut report = LoadReport::default();
        let mut loaded = Vec::new();

        for plugin in &config.plugins {
            if !plugin.enabled {
                info!(plugin = %plugin.name, "Plugin disabled, skipping");
                report.skipped.push(plugin.name.clone());
                continue;
            }

            let spec = resolver.resolve_library(&plugin.library).and_then(|source| {
                let mut spec = LoadSpec::new(&plugin.name, source);
                if let Some(path) = &plugin.config {
                    spec = spec.with_config(resolver.resolve_config(path)?);
                }
                Ok(spec)
            });

            match spec.and_then(|spec| self.load(spec)) {
                Ok(handle) => loaded.push(handle),
                Err(e) if e.is_fatal() && halt => {
                    error!(plugin = %plugin.name, error = %e, "Fatal plugin load error");
                    return Err(e);
                }
                Err(e) => {
                    error!(plugin = %plugin.name, error = %e, "Failed to load plugin, skipping");
                    report.failed.push(plugin.name.clone());
                }
            }
        }

        for handle in loaded {
            match handle.start() {
                Ok(()) => report.started.push(handle.name().to_string()),
                Err(e) => {
                    error!(plugin = %handle.name(), error = %e, "Failed to start plugin");
                    report.failed.push(handle.name().to_string());
                    let _ = self.unregister(handle.name());
                }
            }
        }

        info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        Ok(report)
    }

    /// Load one plugin and register it, without starting it
    pub fn load(&self, spec: LoadSpec) -> Result<Arc<PluginHandle>> {
        if self.plugins.contains_key(&spec.name) {
            return Err(Error::PluginAlreadyExists(spec.name));
        }

        let handle = Arc::new(PluginHandle::load(spec, &self.catalog, &self.services)?);
        self.register(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Record a loaded handle under its name
    pub fn register(&self, handle: Arc<PluginHandle>) -> Result<()> {
        let name = handle.name().to_string();
        match self.plugins.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::PluginAlreadyExists(name));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        self.order.lock().push(name.clone());
        info!(plugin = %name, "Plugin registered");
        Ok(())
    }

    /// Register a queue-only endpoint that can subscribe and receive
    /// messages but has no worker
    pub fn register_endpoint(&self, name: &str) -> Result<Arc<WorkQueue>> {
        if self.plugins.contains_key(name) {
            return Err(Error::PluginAlreadyExists(name.to_string()));
        }

        let queue = Arc::new(WorkQueue::new(self.services.queue_policy()));
        if !self.services.queues().insert(name, Arc::clone(&queue)) {
            return Err(Error::PluginAlreadyExists(name.to_string()));
        }
        Ok(queue)
    }

    /// Remove an endpoint registered with [`register_endpoint`](Self::register_endpoint)
    pub fn unregister_endpoint(&self, name: &str) {
        if let Some(queue) = self.services.queues().remove(name) {
            queue.close();
            for item in queue.drain() {
                if let WorkItem::Packet(packet) = item {
                    self.services.packets().release(&packet);
                }
            }
        }
        self.services.bus().unsubscribe_all(name);
    }

    /// Look up a plugin
    pub fn get(&self, name: &str) -> Option<Arc<PluginHandle>> {
        self.plugins.get(name).map(|h| Arc::clone(h.value()))
    }

    /// Input queue of a plugin or endpoint
    pub fn lookup_queue(&self, name: &str) -> Result<Arc<WorkQueue>> {
        self.services
            .queues()
            .get(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// Plugin names in load order
    pub fn names(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Handles ordered by name
    pub fn handles(&self) -> Vec<Arc<PluginHandle>> {
        let mut handles: Vec<Arc<PluginHandle>> =
            self.plugins.iter().map(|h| Arc::clone(h.value())).collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Remove a plugin and unload it
    pub fn unregister(&self, name: &str) -> Result<()> {
        let (_, handle) = self
            .plugins
            .remove(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
        self.order.lock().retain(|n| n != name);

        handle.unload();
        info!(plugin = %name, "Plugin unregistered");
        Ok(())
    }

    /// Unload every plugin, most recently loaded first
    pub fn unload_all(&self) {
        let names: Vec<String> = self.order.lock().iter().rev().cloned().collect();
        for name in names {
            if let Err(e) = self.unregister(&name) {
                warn!(plugin = %name, error = %e, "Unload failed");
            }
        }
    }
}
