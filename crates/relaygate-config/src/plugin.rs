//! Per-plugin settings files

use crate::loader::parse_file;
use relaygate_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// One declared output edge
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Destination plugin name
    #[serde(default)]
    pub plugin: Option<String>,

    /// Plugin-specific keys attached to this output
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OutputConfig {
    /// Output to `plugin` with no extra keys
    pub fn to(plugin: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// One declared publication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishConfig {
    /// Fully-qualified name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Settings read from a plugin's own configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginSettings {
    /// Output edges, in declaration order
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// Published names
    #[serde(default)]
    pub publish: Vec<PublishConfig>,

    /// Initial dispatch-loop dequeue timeout
    #[serde(default, with = "humantime_serde")]
    pub queue_timeout: Option<Duration>,

    /// Remaining plugin-specific keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PluginSettings {
    /// Declared output names, ordered and without duplicates
    ///
    /// Entries without a `plugin` key are skipped with a warning.
    pub fn declared_outputs(&self, owner: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            match &output.plugin {
                Some(name) if !name.is_empty() => {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.clone());
                    }
                }
                _ => warn!(plugin = %owner, "Output entry has no 'plugin' key, skipping"),
            }
        }
        names
    }

    /// Look up a plugin-specific key
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// Load a plugin settings file (YAML, TOML or JSON by extension)
pub fn load_plugin_settings<P: AsRef<Path>>(path: P) -> Result<PluginSettings> {
    parse_file(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_str;
    use crate::ConfigFormat;
    use std::io::Write;

    const SETTINGS: &str = r#"
queue_timeout: "250ms"
ports: [53, 80]
outputs:
  - plugin: "Dns"
    port: 53
  - plugin: "Web"
  - port: 9999
  - plugin: "Dns"
publish:
  - name: "Router.routed"
    description: "Packets routed"
  - name: "Router.state"
"#;

    #[test]
    fn test_parse_settings() {
        let settings: PluginSettings = parse_str(SETTINGS, ConfigFormat::Yaml).unwrap();

        assert_eq!(settings.queue_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.outputs.len(), 4);
        assert_eq!(settings.outputs[0].extra["port"], serde_json::json!(53));
        assert_eq!(settings.publish[1].description, "");
        assert_eq!(settings.get("ports"), Some(&serde_json::json!([53, 80])));
    }

    #[test]
    fn test_declared_outputs_ordered_and_deduplicated() {
        let settings: PluginSettings = parse_str(SETTINGS, ConfigFormat::Yaml).unwrap();
        assert_eq!(settings.declared_outputs("Router"), vec!["Dns", "Web"]);
    }

    #[test]
    fn test_empty_settings() {
        let settings: PluginSettings = parse_str("{}", ConfigFormat::Json).unwrap();
        assert!(settings.outputs.is_empty());
        assert!(settings.queue_timeout.is_none());
        assert!(settings.declared_outputs("Router").is_empty());
    }

    #[test]
    fn test_load_settings_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"outputs": [{"plugin": "Sink"}], "queue_timeout": "1s"}"#)
            .unwrap();

        let settings = load_plugin_settings(file.path()).unwrap();
        assert_eq!(settings.declared_outputs("Source"), vec!["Sink"]);
        assert_eq!(settings.queue_timeout, Some(Duration::from_secs(1)));
    }
}
