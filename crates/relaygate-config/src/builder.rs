//! Configuration builder

use crate::types::{Config, MonitorConfig, PluginConfig, ReplyMode};
use relaygate_core::{QueuePolicy, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plugin library directory
    pub fn plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.gateway.plugin_dir = Some(dir.into());
        self
    }

    /// Set the plugin settings directory
    pub fn plugin_conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.gateway.plugin_conf_dir = Some(dir.into());
        self
    }

    /// Set whether fatal load errors abort start-up
    pub fn halt_on_critical(mut self, halt: bool) -> Self {
        self.config.gateway.halt_on_critical = halt;
        self
    }

    /// Set the queue policy for every plugin
    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.config.gateway.queue = policy;
        self
    }

    /// Set the control service configuration
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.config.monitor = monitor;
        self
    }

    /// Set the control service listen address
    pub fn monitor_listen(mut self, addr: SocketAddr) -> Self {
        self.config.monitor.listen = addr;
        self
    }

    /// Set the control service reply mode
    pub fn reply_mode(mut self, mode: ReplyMode) -> Self {
        self.config.monitor.reply_mode = mode;
        self
    }

    /// Disable the control service
    pub fn without_monitor(mut self) -> Self {
        self.config.monitor.enabled = false;
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.observability.logging.level = level.into();
        self
    }

    /// Append a plugin declaration
    pub fn plugin(mut self, plugin: PluginConfig) -> Self {
        self.config.plugins.push(plugin);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}
