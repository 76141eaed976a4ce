//! Error types for relaygate

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for relaygate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plugin module could not be loaded
    #[error("Failed to load module for plugin '{plugin}': {message}")]
    ModuleLoad {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// A required entry point is missing from a plugin module
    #[error("Plugin '{plugin}' does not export required symbol '{symbol}'")]
    MissingSymbol {
        /// Plugin name
        plugin: String,
        /// Symbol name
        symbol: String,
    },

    /// Plugin module was built against a different plugin ABI
    #[error("Plugin '{plugin}' ABI version mismatch: expected {expected}, found {found}")]
    AbiMismatch {
        /// Plugin name
        plugin: String,
        /// ABI version of the host
        expected: u32,
        /// ABI version reported by the module
        found: u32,
    },

    /// Plugin error
    #[error("Plugin error in '{plugin}': {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// Plugin not found
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin already registered
    #[error("Plugin already exists: {0}")]
    PluginAlreadyExists(String),

    /// Plugin lifecycle transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Forward to an output the plugin never declared
    #[error("Plugin '{plugin}' has no declared output '{output}'")]
    UndeclaredOutput {
        /// Plugin name
        plugin: String,
        /// Requested output
        output: String,
    },

    /// Work queue refused an item
    #[error("Queue for '{0}' rejected the item")]
    QueueRejected(String),

    /// Malformed control protocol input
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a module load error
    pub fn module_load(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ModuleLoad {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Errors that abort start-up unless `halt_on_critical` is disabled
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ModuleLoad { .. }
                | Error::MissingSymbol { .. }
                | Error::AbiMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("missing plugin_dir".to_string()).is_fatal());
        assert!(Error::module_load("A", "no such file").is_fatal());
        assert!(Error::MissingSymbol {
            plugin: "A".to_string(),
            symbol: "relaygate_plugin_create".to_string(),
        }
        .is_fatal());
        assert!(!Error::UndeclaredOutput {
            plugin: "A".to_string(),
            output: "C".to_string(),
        }
        .is_fatal());
        assert!(!Error::Protocol("bad option".to_string()).is_fatal());
    }

    #[test]
    fn test_plugin_error() {
        let err = Error::plugin("Duplicate", "no outputs declared");
        assert!(matches!(err, Error::Plugin { .. }));
        assert!(err.to_string().contains("Duplicate"));
    }
}
