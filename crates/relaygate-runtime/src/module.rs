//! Plugin module loading
//!
//! A module is either a statically linked constructor looked up in the
//! [`ModuleCatalog`] or a shared library exposing the versioned entry points.

use libloading::{Library, Symbol};
use relaygate_config::LibrarySource;
use relaygate_core::{Error, Result};
use relaygate_plugin_api::abi::{
    RawAbiVersionFn, RawCreateFn, RawDestroyFn, ABI_VERSION_SYMBOL, CREATE_SYMBOL, DESTROY_SYMBOL,
};
use relaygate_plugin_api::{
    create_instance, destroy_instance, Host, Plugin, PluginConstructor, RawEntryPoints, ABI_VERSION,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Statically linked plugin constructors, addressed as `builtin:<id>`
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    constructors: BTreeMap<String, PluginConstructor>,
}

impl ModuleCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `id`
    pub fn register(&mut self, id: impl Into<String>, ctor: PluginConstructor) -> &mut Self {
        self.constructors.insert(id.into(), ctor);
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, id: impl Into<String>, ctor: PluginConstructor) -> Self {
        self.register(id, ctor);
        self
    }

    /// Look up a constructor
    pub fn get(&self, id: &str) -> Option<PluginConstructor> {
        self.constructors.get(id).copied()
    }

    /// Registered ids, ordered
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

/// Loaded plugin code
pub enum PluginModule {
    /// Statically linked constructor
    Static {
        /// Catalog id
        id: String,
        /// Constructor
        ctor: PluginConstructor,
    },
    /// Shared library; kept loaded as long as the module lives
    Dynamic {
        /// Library path
        path: PathBuf,
        /// Resolved entry points
        entry: RawEntryPoints,
        /// Open library handle
        library: Library,
    },
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginModule::Static { id, .. } => f.debug_struct("Static").field("id", id).finish(),
            PluginModule::Dynamic { path, .. } => {
                f.debug_struct("Dynamic").field("path", path).finish()
            }
        }
    }
}

impl PluginModule {
    /// Load the module for `plugin`
    pub fn open(plugin: &str, source: &LibrarySource, catalog: &ModuleCatalog) -> Result<Self> {
        match source {
            LibrarySource::Builtin(id) => {
                let ctor = catalog.get(id).ok_or_else(|| {
                    Error::module_load(plugin, format!("no built-in module named '{id}'"))
                })?;
                debug!(plugin = %plugin, module = %id, "Using built-in module");
                Ok(PluginModule::Static {
                    id: id.clone(),
                    ctor,
                })
            }
            LibrarySource::Path(path) => Self::open_dynamic(plugin, path),
        }
    }

    fn open_dynamic(plugin: &str, path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; modules are trusted
        // gateway extensions named by the operator's configuration.
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::module_load(plugin, format!("{}: {e}", path.display())))?;

        let missing = |symbol: &[u8]| Error::MissingSymbol {
            plugin: plugin.to_string(),
            symbol: String::from_utf8_lossy(symbol).into_owned(),
        };

        // SAFETY: the symbol types match the signatures emitted by
        // `declare_plugin!`; the copied pointers stay valid while `library`
        // is held by the returned module.
        let (version, create, destroy) = unsafe {
            let version: Symbol<'_, RawAbiVersionFn> = library
                .get(ABI_VERSION_SYMBOL)
                .map_err(|_| missing(ABI_VERSION_SYMBOL))?;
            let create: Symbol<'_, RawCreateFn> =
                library.get(CREATE_SYMBOL).map_err(|_| missing(CREATE_SYMBOL))?;
            let destroy: Symbol<'_, RawDestroyFn> =
                library.get(DESTROY_SYMBOL).map_err(|_| missing(DESTROY_SYMBOL))?;
            ((*version)(), *create, *destroy)
        };

        if version != ABI_VERSION {
            return Err(Error::AbiMismatch {
                plugin: plugin.to_string(),
                expected: ABI_VERSION,
                found: version,
            });
        }

        info!(plugin = %plugin, path = %path.display(), "Loaded plugin module");

        Ok(PluginModule::Dynamic {
            path: path.to_path_buf(),
            entry: RawEntryPoints { create, destroy },
            library,
        })
    }

    /// Name reported as the plugin's module
    pub fn name(&self) -> String {
        match self {
            PluginModule::Static { id, .. } => LibrarySource::Builtin(id.clone()).module_name(),
            PluginModule::Dynamic { path, .. } => LibrarySource::Path(path.clone()).module_name(),
        }
    }

    /// Construct and initialize an instance
    pub fn instantiate(&self, host: Host) -> Option<Box<dyn Plugin>> {
        match self {
            PluginModule::Static { ctor, .. } => create_instance(host, *ctor).ok(),
            // SAFETY: the entry points were resolved from `library`, which is
            // still loaded, and the ABI version was checked at open.
            PluginModule::Dynamic { entry, .. } => unsafe { entry.create(host) },
        }
    }

    /// Destroy an instance created by [`instantiate`](Self::instantiate)
    pub fn destroy(&self, instance: Box<dyn Plugin>) {
        match self {
            PluginModule::Static { .. } => {
                destroy_instance(instance);
            }
            // SAFETY: as in `instantiate`; `instance` came from this module.
            PluginModule::Dynamic { entry, .. } => unsafe { entry.destroy(instance) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::Packet;
    use relaygate_plugin_api::testing::MockHost;
    use std::sync::Arc;

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
    fn test_builtin_module() {
        let catalog = ModuleCatalog::new().with("sink", sink);
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["sink"]);

        let module =
            PluginModule::open("Sink", &LibrarySource::Builtin("sink".to_string()), &catalog)
                .unwrap();
        assert_eq!(module.name(), "builtin:sink");

        let instance = module
            .instantiate(Arc::new(MockHost::new("Sink")))
            .expect("instance");
        module.destroy(instance);
    }

    #[test]
    fn test_unknown_builtin_is_fatal() {
        let err = PluginModule::open(
            "Sink",
            &LibrarySource::Builtin("nope".to_string()),
            &ModuleCatalog::new(),
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_library_is_fatal() {
        let err = PluginModule::open(
            "Sink",
            &LibrarySource::Path(PathBuf::from("/nonexistent/librelaygate_sink.so")),
            &ModuleCatalog::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }));
        assert!(err.is_fatal());
    }
}
