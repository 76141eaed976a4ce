//! Gateway context tying configuration, services and plugins together

use crate::directory::ThreadDirectory;
use crate::module::ModuleCatalog;
use crate::registry::{LoadReport, PluginRegistry};
use crate::services::Services;
use crate::shutdown::ShutdownSignal;
use crate::stats::StatsSnapshot;
use relaygate_config::{Config, PathResolver};
use relaygate_core::{Error, PacketCounters, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-plugin row of a [`GatewayStats`] report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStatsRow {
    /// Plugin name
    pub name: String,
    /// Counters
    pub stats: StatsSnapshot,
    /// Input queue depth
    pub queue_len: usize,
}

/// Point-in-time view of gateway throughput
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Seconds since start
    pub uptime_secs: u64,
    /// Packet table counters
    pub packets: PacketCounters,
    /// One row per plugin, ordered by name
    pub plugins: Vec<PluginStatsRow>,
}

/// Running gateway
#[derive(Debug)]
pub struct Gateway {
    config: Config,
    registry: PluginRegistry,
    shutdown: ShutdownSignal,
}

impl Gateway {
    /// Create a gateway for `config` with the given built-in modules
    pub fn new(config: Config, catalog: ModuleCatalog) -> Self {
        Self::with_threads(config, catalog, ThreadDirectory::new())
    }

    /// Create a gateway sharing an existing thread directory, so log layers
    /// installed before the gateway can resolve plugin threads
    pub fn with_threads(config: Config, catalog: ModuleCatalog, threads: ThreadDirectory) -> Self {
        let services = Arc::new(Services::with_threads(config.gateway.queue, threads));
        Self {
            registry: PluginRegistry::new(services, catalog),
            config,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Shared services
    pub fn services(&self) -> &Arc<Services> {
        self.registry.services()
    }

    /// Shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Time since the gateway was created
    pub fn uptime(&self) -> Duration {
        self.services().uptime()
    }

    /// Load and start all configured plugins
    ///
    /// On a fatal error the diagnostic dump is logged and every plugin
    /// loaded so far is unloaded again before the error is returned.
    pub fn start(&self, resolver: &PathResolver) -> Result<LoadReport> {
        info!(plugins = self.config.plugins.len(), "Starting gateway");

        match self.registry.load_all(&self.config, resolver) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "Gateway start-up aborted");
                self.dump_diagnostics();
                self.registry.unload_all();
                Err(e)
            }
        }
    }

    /// Unload every plugin and log the packet table summary
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        info!("Stopping gateway");
        self.registry.unload_all();
        self.services().packets().log_summary();
        info!(uptime_secs = self.uptime().as_secs(), "Gateway stopped");
    }

    /// Log every tracked packet and each plugin's counters
    pub fn dump_diagnostics(&self) {
        let packets = self.services().packets();
        for tracked in packets.dump() {
            warn!(
                packet = tracked.id,
                len = tracked.len,
                refs = tracked.count,
                "Tracked packet"
            );
        }

        for row in self.stats().plugins {
            warn!(
                plugin = %row.name,
                packets_in = row.stats.packets_in,
                packets_out = row.stats.packets_out,
                packets_dropped = row.stats.packets_dropped,
                packets_held = row.stats.packets_held(),
                queue_len = row.queue_len,
                "Plugin statistics"
            );
        }

        packets.log_summary();
    }

    /// Current throughput figures
    pub fn stats(&self) -> GatewayStats {
        let plugins = self
            .registry
            .handles()
            .into_iter()
            .map(|handle| PluginStatsRow {
                name: handle.name().to_string(),
                stats: handle.stats(),
                queue_len: handle.queue_len(),
            })
            .collect();

        GatewayStats {
            uptime_secs: self.uptime().as_secs(),
            packets: self.services().packets().counters(),
            plugins,
        }
    }

    /// Forwarding graph: each plugin with its sorted outputs, ordered by name
    pub fn graph(&self) -> Vec<(String, Vec<String>)> {
        self.registry
            .handles()
            .into_iter()
            .map(|handle| {
                let mut outputs = handle.outputs().to_vec();
                outputs.sort();
                (handle.name().to_string(), outputs)
            })
            .collect()
    }

    /// Settings file of a loaded plugin
    pub fn plugin_config_path(&self, plugin: &str) -> Result<PathBuf> {
        let handle = self
            .registry
            .get(plugin)
            .ok_or_else(|| Error::PluginNotFound(plugin.to_string()))?;
        handle
            .config_path()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Config(format!("Plugin '{plugin}' has no settings file")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_config::{ConfigBuilder, PluginConfig};
    use relaygate_core::Packet;
    use relaygate_plugin_api::{Host, Plugin};
    use std::io::Write;

    #[derive(Debug)]
    struct Sink;

    impl Plugin for Sink {
        fn process_packet(&mut self, _packet: &Packet) -> bool {
            true
        }
    }

    fn sink(_host: Host) -> Box<dyn Plugin> {
        Box::new(Sink)
    }

    #[test]
    fn test_start_stats_graph_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let conf_dir = dir.path().join("conf");
        std::fs::create_dir(&conf_dir).unwrap();
        let mut file = std::fs::File::create(conf_dir.join("head.yaml")).unwrap();
        writeln!(file, "outputs:\n  - plugin: Tail\n  - plugin: Mid").unwrap();

        let config = ConfigBuilder::new()
            .without_monitor()
            .plugin_conf_dir("conf")
            .plugin(PluginConfig::new("Head", "builtin:sink").with_config("head.yaml"))
            .plugin(PluginConfig::new("Mid", "builtin:sink"))
            .plugin(PluginConfig::new("Tail", "builtin:sink"))
            .build()
            .unwrap();

        let gateway = Gateway::new(config, ModuleCatalog::new().with("sink", sink));
        let resolver = PathResolver::new(dir.path(), dir.path(), &gateway.config().gateway);
        let report = gateway.start(&resolver).unwrap();
        assert_eq!(report.started.len(), 3);

        let graph = gateway.graph();
        assert_eq!(graph[0], ("Head".to_string(), vec!["Mid".to_string(), "Tail".to_string()]));
        assert!(graph[1].1.is_empty());

        let stats = gateway.stats();
        assert_eq!(stats.plugins.len(), 3);
        assert_eq!(stats.packets.packets_in, 0);

        assert_eq!(
            gateway.plugin_config_path("Head").unwrap(),
            conf_dir.join("head.yaml")
        );
        assert!(matches!(
            gateway.plugin_config_path("Ghost"),
            Err(Error::PluginNotFound(_))
        ));
        assert!(gateway.plugin_config_path("Mid").is_err());

        gateway.shutdown();
        assert!(gateway.shutdown_signal().is_triggered());
        assert!(gateway.registry().is_empty());
    }

    #[test]
    fn test_fatal_start_unloads_loaded_plugins() {
        let config = ConfigBuilder::new()
            .without_monitor()
            .plugin(PluginConfig::new("Good", "builtin:sink"))
            .plugin(PluginConfig::new("Bad", "builtin:absent"))
            .build()
            .unwrap();

        let gateway = Gateway::new(config, ModuleCatalog::new().with("sink", sink));
        let resolver = PathResolver::new("/", "/", &gateway.config().gateway);
        assert!(gateway.start(&resolver).is_err());
        assert!(gateway.registry().is_empty());
        assert!(!gateway.services().queues().contains("Good"));
    }
}
