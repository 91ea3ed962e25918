//! Teneo Node - persistent heartbeat client for the Teneo network
//!
//! Reads the user id from a local JSON store, opens a WebSocket to the
//! Teneo endpoint, sends a PING every ten seconds while connected, and
//! reconnects with exponential backoff whenever the connection drops.

mod cli;
mod config;
mod connection;
mod error;
mod logging;
mod protocol;
mod signal;
mod store;

use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Cli, Commands, ConfigSubcommand, IdentitySubcommand};
use crate::config::NodeConfig;
use crate::connection::{ConnectionManager, WsDialer};
use crate::error::{Error, Result};
use crate::store::LocalStore;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { config, store } => {
            let mut config = NodeConfig::load(config.as_deref())?;
            if let Some(store) = store {
                config.storage.store_path = config::expand_path(&store);
            }
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            run_node(config)
        }
        Commands::Identity { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_identity_command(subcommand)
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
    }
}

fn run_node(config: NodeConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint.url,
        protocol = %config.endpoint.version,
        "Starting Teneo Node"
    );

    // Nothing is dialed without an identity
    let store = LocalStore::new(config.store_path());
    let user_id = store.require_user_id()?;
    debug!(store = %store.path().display(), "User id loaded");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    runtime.block_on(async {
        let mut manager = ConnectionManager::new(config.endpoint.clone(), WsDialer);
        manager.run(&user_id, signal::shutdown_signal()).await
    })?;

    info!("Teneo Node stopped");
    Ok(())
}

/// Store location for identity commands: `--store`, else the configured path
fn identity_store(store: Option<String>) -> Result<LocalStore> {
    let path = match store {
        Some(path) => std::path::PathBuf::from(config::expand_path(&path)),
        None => NodeConfig::load(None)?.store_path(),
    };
    Ok(LocalStore::new(path))
}

fn handle_identity_command(subcommand: IdentitySubcommand) -> Result<()> {
    match subcommand {
        IdentitySubcommand::Show { store } => {
            let store = identity_store(store)?;
            println!("{}", store.require_user_id()?);
        }
        IdentitySubcommand::Set { user_id, store } => {
            let user_id = user_id.trim();
            if user_id.is_empty() {
                return Err(Error::config_field_invalid("userId", "userId must not be empty"));
            }
            let store = identity_store(store)?;
            store.set_user_id(user_id)?;
            println!("User id saved to {}", store.path().display());
        }
    }

    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = NodeConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            NodeConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
