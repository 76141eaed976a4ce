//! Configuration validation

use crate::paths::LibrarySource;
use crate::Config;
use relaygate_core::{Error, Result};
use std::collections::HashSet;

/// Name the control service registers under
pub const MONITOR_PLUGIN_NAME: &str = "Monitor";

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_monitor(config)?;
    validate_logging(config)?;
    validate_plugins(config)?;
    Ok(())
}

fn validate_monitor(config: &Config) -> Result<()> {
    if config.monitor.max_clients == 0 {
        return Err(Error::Config("monitor.max_clients must be > 0".to_string()));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    match config.observability.logging.format.as_str() {
        "text" | "json" => Ok(()),
        other => Err(Error::Config(format!(
            "Invalid log format: {other} (must be text or json)"
        ))),
    }
}

fn validate_plugins(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for plugin in &config.plugins {
        if plugin.name.is_empty() {
            return Err(Error::Config("plugin name cannot be empty".to_string()));
        }

        if !seen.insert(plugin.name.as_str()) {
            return Err(Error::Config(format!(
                "Duplicate plugin name: {}",
                plugin.name
            )));
        }

        if config.monitor.enabled && plugin.name == MONITOR_PLUGIN_NAME {
            return Err(Error::Config(format!(
                "Plugin name '{MONITOR_PLUGIN_NAME}' is reserved for the control service"
            )));
        }

        if plugin.library.is_empty() {
            return Err(Error::Config(format!(
                "Plugin '{}' has an empty library",
                plugin.name
            )));
        }

        if !plugin.enabled {
            continue;
        }

        if let LibrarySource::Path(path) = LibrarySource::parse(&plugin.library) {
            if path.is_relative() && config.gateway.plugin_dir.is_none() {
                return Err(Error::Config(format!(
                    "Plugin '{}' uses a relative library but gateway.plugin_dir is not set",
                    plugin.name
                )));
            }
        }

        if let Some(path) = &plugin.config {
            if path.is_relative() && config.gateway.plugin_conf_dir.is_none() {
                return Err(Error::Config(format!(
                    "Plugin '{}' uses a relative config but gateway.plugin_conf_dir is not set",
                    plugin.name
                )));
            }
        }
    }

    if config.plugins.iter().all(|p| !p.enabled) {
        tracing::warn!("No enabled plugins configured");
    }

    Ok(())
}
