//! Library and settings path resolution

use crate::types::GatewayConfig;
use relaygate_core::{Error, Result};
use std::path::{Path, PathBuf};

const BUILTIN_PREFIX: &str = "builtin:";

/// Where a plugin's code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// Statically linked constructor registered under this id
    Builtin(String),
    /// Shared library on disk
    Path(PathBuf),
}

impl LibrarySource {
    /// Parse a `library` value
    pub fn parse(library: &str) -> Self {
        match library.strip_prefix(BUILTIN_PREFIX) {
            Some(id) => LibrarySource::Builtin(id.to_string()),
            None => LibrarySource::Path(PathBuf::from(library)),
        }
    }

    /// Module name reported to plugins and the control protocol
    pub fn module_name(&self) -> String {
        match self {
            LibrarySource::Builtin(id) => format!("{BUILTIN_PREFIX}{id}"),
            LibrarySource::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
        }
    }
}

/// Resolves relative plugin paths
///
/// Absolute paths are used verbatim. Relative libraries resolve against
/// `<program dir>/<plugin_dir>`, relative settings files against
/// `<main config dir>/<plugin_conf_dir>`.
#[derive(Debug, Clone)]
pub struct PathResolver {
    program_dir: PathBuf,
    config_dir: PathBuf,
    plugin_dir: Option<PathBuf>,
    plugin_conf_dir: Option<PathBuf>,
}

impl PathResolver {
    /// Create a resolver for one gateway configuration
    pub fn new(
        program_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            program_dir: program_dir.into(),
            config_dir: config_dir.into(),
            plugin_dir: gateway.plugin_dir.clone(),
            plugin_conf_dir: gateway.plugin_conf_dir.clone(),
        }
    }

    /// Resolve a plugin's `library` value
    pub fn resolve_library(&self, library: &str) -> Result<LibrarySource> {
        match LibrarySource::parse(library) {
            LibrarySource::Path(path) if path.is_relative() => {
                let dir = self.plugin_dir.as_ref().ok_or_else(|| {
                    Error::Config(format!(
                        "gateway.plugin_dir is required to resolve relative library '{library}'"
                    ))
                })?;
                Ok(LibrarySource::Path(self.program_dir.join(dir).join(path)))
            }
            source => Ok(source),
        }
    }

    /// Resolve a plugin's settings file path
    pub fn resolve_config(&self, config: &Path) -> Result<PathBuf> {
        if config.is_absolute() {
            return Ok(config.to_path_buf());
        }

        let dir = self.plugin_conf_dir.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "gateway.plugin_conf_dir is required to resolve relative config '{}'",
                config.display()
            ))
        })?;
        Ok(self.config_dir.join(dir).join(config))
    }
}
