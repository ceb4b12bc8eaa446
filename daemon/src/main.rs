// bluehostd — Bluetooth host daemon
//
// Watches kernel HCI stack events and manages the lifecycle of every
// local controller: registration, isolated bring-up, configuration from
// persisted settings, and default adapter election.

mod config;

use anyhow::Result;
use clap::Parser;
use config::DaemonConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "bluehostd")]
#[command(about = "Bluetooth host daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write logs to daily-rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bluehostd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    let config_file = match &cli.config {
        Some(path) => path.clone(),
        None => DaemonConfig::config_file()?,
    };
    let config = DaemonConfig::load(&config_file)?;
    info!(config = %config_file.display(), "starting bluehostd");

    run(config).await
}

#[cfg(target_os = "linux")]
async fn run(config: DaemonConfig) -> Result<()> {
    use bluehost_core::backend::hci::HciBackend;
    use bluehost_core::hci::raw::RawHciDriver;
    use bluehost_core::lifecycle::configure::NoServiceClasses;
    use bluehost_core::lifecycle::HostContext;
    use bluehost_core::{BackendSlot, LogNotifier, NoopSecurity, SledStore};
    use std::sync::Arc;

    let storage_path = config.storage_path()?;
    let store = SledStore::open(&storage_path)
        .map_err(|err| anyhow::anyhow!("cannot open adapter store: {err}"))?;
    info!(path = %storage_path.display(), "adapter store opened");

    let ctx = HostContext {
        driver: Arc::new(RawHciDriver::new()),
        store: Arc::new(store),
        notifier: Arc::new(LogNotifier),
        security: Arc::new(NoopSecurity),
        services: Arc::new(NoServiceClasses),
        config: config.host,
    };

    let mut backends = BackendSlot::new();
    backends
        .register(Arc::new(HciBackend::new(ctx)))
        .map_err(|err| anyhow::anyhow!("cannot register HCI backend: {err}"))?;

    let handle = match backends.activate().await? {
        Some(handle) => handle,
        None => anyhow::bail!("no host backend available"),
    };

    let adapters = handle.list_adapters().await?;
    info!(count = adapters.len(), "daemon running");

    tokio::signal::ctrl_c().await?;
    info!("termination requested");

    backends.cleanup().await;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run(_config: DaemonConfig) -> Result<()> {
    anyhow::bail!("bluehostd requires Linux HCI sockets")
}
