//! Relaygate CLI

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use relaygate_config::{load_config, Config, PathResolver};
use relaygate_monitor::{log_channel, ControlServer, LogReceiver};
use relaygate_runtime::{
    env_filter, Gateway, ModuleCatalog, PluginLogFilter, SignalHandler, ThreadDirectory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "relaygate")]
#[command(about = "Relaygate packet-processing gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the configured plugins and run until interrupted
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "relaygate.yaml", env = "RELAYGATE_CONFIG")]
        config: PathBuf,

        /// Log level, overrides observability.logging.level
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "relaygate.yaml", env = "RELAYGATE_CONFIG")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => serve(config, log_level).await,

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    let enabled = cfg.plugins.iter().filter(|p| p.enabled).count();
                    tracing::info!("Configuration is valid");
                    tracing::info!("  Plugins: {} ({} enabled)", cfg.plugins.len(), enabled);
                    if cfg.monitor.enabled {
                        tracing::info!("  Monitor: {}", cfg.monitor.listen);
                    } else {
                        tracing::info!("  Monitor: disabled");
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Relaygate packet-processing gateway");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            println!("Plugin ABI: {}", relaygate_plugin_api::ABI_VERSION);
            Ok(())
        }
    }
}

async fn serve(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let mut config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(level) = log_level {
        config.observability.logging.level = level;
    }

    let threads = ThreadDirectory::new();
    let logs = init_tracing(&config, &threads)?;

    tracing::info!("Starting relaygate");
    tracing::info!("Config file: {}", config_path.display());

    let resolver = PathResolver::new(program_dir()?, config_dir(&config_path), &config.gateway);
    let monitor_enabled = config.monitor.enabled;
    let gateway = Arc::new(Gateway::with_threads(config, builtin_catalog(), threads));

    let report = gateway.start(&resolver)?;
    tracing::info!(
        started = report.started.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Gateway running"
    );

    let shutdown_signal = gateway.shutdown_signal();
    tokio::spawn(SignalHandler::new(shutdown_signal.clone()).run());

    let monitor = if monitor_enabled {
        match ControlServer::bind(Arc::clone(&gateway), logs).await {
            Ok(server) => Some(tokio::spawn(server.run(shutdown_signal.clone()))),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start control service");
                let stopping = Arc::clone(&gateway);
                tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
                return Err(e.into());
            }
        }
    } else {
        None
    };

    shutdown_signal.wait().await;

    if let Some(monitor) = monitor {
        match monitor.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Control service failed"),
            Err(e) => tracing::warn!(error = %e, "Control service task failed"),
        }
    }

    let stopping = Arc::clone(&gateway);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    tracing::info!("Relaygate stopped");
    Ok(())
}

fn builtin_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with("passthrough", relaygate_passthrough::construct)
        .with("duplicate", relaygate_duplicate::construct)
}

fn program_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating the relaygate executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn init_tracing(config: &Config, threads: &ThreadDirectory) -> Result<Option<LogReceiver>> {
    let logging = &config.observability.logging;
    let plugin_filter = PluginLogFilter::new(threads.clone(), logging.plugin_filters.iter().cloned());

    let json = logging.format == "json";
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_level(true)
    });
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_thread_names(true)
    });

    let (monitor_layer, logs) = if config.monitor.enabled {
        let (layer, logs) = log_channel(threads.clone());
        (Some(layer.with_filter(plugin_filter.clone())), Some(logs))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(logging)?)
        .with(text_layer.with_filter(plugin_filter.clone()))
        .with(json_layer.with_filter(plugin_filter))
        .with(monitor_layer)
        .try_init()?;

    Ok(logs)
}
