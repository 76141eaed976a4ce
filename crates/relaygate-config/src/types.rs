//! Configuration types

use relaygate_core::QueuePolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Control service
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Observability
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Plugins, loaded in declaration order
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Directory relative plugin libraries are resolved against,
    /// itself relative to the program directory
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,

    /// Directory relative plugin settings files are resolved against,
    /// itself relative to the main config file's directory
    #[serde(default)]
    pub plugin_conf_dir: Option<PathBuf>,

    /// Abort start-up on a fatal plugin load error
    #[serde(default = "default_true")]
    pub halt_on_critical: bool,

    /// Capacity policy applied to every plugin queue
    #[serde(default)]
    pub queue: QueuePolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            plugin_dir: None,
            plugin_conf_dir: None,
            halt_on_critical: true,
            queue: QueuePolicy::default(),
        }
    }
}

/// Who receives a command response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Every connected client
    #[default]
    Broadcast,
    /// Only the client that sent the request
    Requester,
}

/// Control service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Start the control service
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_monitor_listen")]
    pub listen: SocketAddr,

    /// Maximum concurrent clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Response delivery
    #[serde(default)]
    pub reply_mode: ReplyMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_monitor_listen(),
            max_clients: default_max_clients(),
            reply_mode: ReplyMode::default(),
        }
    }
}

/// Plugin declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// Plugin instance name
    pub name: String,

    /// Library path, or `builtin:<id>` for a statically linked plugin
    pub library: String,

    /// Optional settings file
    #[serde(default)]
    pub config: Option<PathBuf>,

    /// Enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PluginConfig {
    /// Declare an enabled plugin without a settings file
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
            config: None,
            enabled: true,
        }
    }

    /// Attach a settings file
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = Some(path.into());
        self
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,

    /// Extra `target=level` directives
    pub filters: Vec<String>,

    /// Plugins whose debug output is kept; empty keeps all
    pub plugin_filters: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            filters: Vec::new(),
            plugin_filters: Vec::new(),
        }
    }
}

// Default functions
fn default_true() -> bool {
    true
}

fn default_monitor_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1234))
}

fn default_max_clients() -> usize {
    5
}
