//! Log filtering driven by `observability.logging`

use crate::directory::ThreadDirectory;
use relaygate_config::LoggingConfig;
use relaygate_core::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::subscriber::Interest;
use tracing::{Level, Metadata};
use tracing_subscriber::layer::{Context, Filter};
use tracing_subscriber::EnvFilter;

/// Build the global filter from the configured level and per-target directives
///
/// `RUST_LOG`, when set, replaces the configured level; the configured
/// directives still apply on top of it.
pub fn env_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    let base = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) if !env.trim().is_empty() => env,
        _ => logging.level.clone(),
    };

    let mut filter = EnvFilter::try_new(&base)
        .map_err(|e| Error::Config(format!("Invalid log level '{base}': {e}")))?;

    for directive in &logging.filters {
        let parsed = directive
            .parse()
            .map_err(|e| Error::Config(format!("Invalid log filter '{directive}': {e}")))?;
        filter = filter.add_directive(parsed);
    }

    Ok(filter)
}

/// Keeps debug and trace events from plugin worker threads only for the
/// listed plugins
///
/// Events from threads that are not plugin workers, and any event at info
/// or above, always pass. An empty list keeps everything.
#[derive(Debug, Clone)]
pub struct PluginLogFilter {
    threads: ThreadDirectory,
    allowed: Arc<HashSet<String>>,
}

impl PluginLogFilter {
    /// Create a filter resolving threads through `threads`
    pub fn new<I, S>(threads: ThreadDirectory, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threads,
            allowed: Arc::new(plugins.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether any plugin restriction is configured
    pub fn is_active(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Decide for an event at `level` raised on the calling thread
    pub fn allows(&self, level: &Level) -> bool {
        if !self.is_active() || *level <= Level::INFO {
            return true;
        }
        match self.threads.current_plugin() {
            Some(plugin) => self.allowed.contains(&plugin),
            None => true,
        }
    }
}

impl<S> Filter<S> for PluginLogFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        self.allows(meta.level())
    }

    fn callsite_enabled(&self, meta: &'static Metadata<'static>) -> Interest {
        if !self.is_active() || *meta.level() <= Level::INFO {
            Interest::always()
        } else {
            Interest::sometimes()
        }
    }
}
