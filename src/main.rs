//! chatrelay - rule-based message relay between chat networks.
//!
//! Connects to every configured client (IRC, Gitter, Telegram) and forwards
//! messages between their rooms according to an ordered list of rules.

mod bridge;
mod cli;
mod common;
mod config;
mod logging;
mod transport;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use bridge::{ClientRegistry, MessageBus, Router, RuleSet};
use cli::{Cli, Invocation};
use config::{apply_env_overrides, load_config, Config};
use transport::TransportKinds;

/// How long transports get to close their sessions on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayVersion => {
            e.print()?;
            return Ok(());
        }
        Err(e) => {
            e.print()?;
            std::process::exit(1);
        }
    };

    let kinds = TransportKinds::builtin();

    let config_path = match cli.invocation()? {
        Invocation::Help(topic) => {
            println!("{}", cli::help_text(topic, &kinds)?);
            return Ok(());
        }
        Invocation::Run(path) => path,
    };

    let config = load_config(&config_path)?;
    logging::init(config.logging.as_ref())?;

    let span = logging::root_span(config.logging.as_ref());
    run(config, &config_path, kinds).instrument(span).await
}

/// Connect every client and relay until a shutdown signal arrives.
async fn run(config: Config, config_path: &Path, kinds: TransportKinds) -> Result<()> {
    info!("chatrelay v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path.display());

    let config = apply_env_overrides(config, |kind, field| kinds.declares(kind, field));

    // Every startup-fatal check happens before any connection is opened
    let registry = Arc::new(ClientRegistry::build(&config.clients, &kinds)?);
    let rules = RuleSet::compile(&config.rules, |id| registry.contains(id))?;
    if rules.is_empty() {
        warn!("No forwarding rules are active, nothing will be relayed");
    }

    let (bus, bus_rx) = MessageBus::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transports = registry.connect_all(&bus, shutdown_rx);
    drop(bus);

    let router = tokio::spawn(
        Router::new(rules, Arc::clone(&registry))
            .run(bus_rx)
            .in_current_span(),
    );

    shutdown_signal().await;
    info!("Shutdown signal received - closing sessions...");

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (all transports already exited): {}", e);
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(transports)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    warn!("Transport task panicked: {}", e);
                }
            }
            info!("All transports stopped");
        }
        Err(_) => warn!("Transports did not stop within {} seconds", SHUTDOWN_GRACE.as_secs()),
    }

    router.abort();
    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
