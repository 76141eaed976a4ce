//! Plugin error types

use std::fmt;

/// Plugin error type
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Initialization failed
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// A plugin callback panicked
    #[error("Plugin panicked: {0}")]
    Panicked(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Create a new initialization error
    pub fn init(msg: impl fmt::Display) -> Self {
        Self::InitError(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::ConfigError(msg.to_string())
    }

    /// Create a new runtime error
    pub fn runtime(msg: impl fmt::Display) -> Self {
        Self::RuntimeError(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        assert!(matches!(PluginError::init("x"), PluginError::InitError(_)));
        assert!(matches!(PluginError::config("x"), PluginError::ConfigError(_)));
        assert!(matches!(PluginError::runtime("x"), PluginError::RuntimeError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = PluginError::config("no outputs declared");
        assert_eq!(err.to_string(), "Configuration error: no outputs declared");
    }
}
