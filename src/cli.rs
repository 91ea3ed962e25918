//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// Teneo Node - keeps a heartbeat connection to the Teneo network
///
/// Reads your user id from a local JSON store, connects to the Teneo
/// endpoint, and reconnects with exponential backoff whenever the
/// connection drops.
#[derive(Parser, Debug)]
#[command(name = "teneo-node")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node (connects to the endpoint and stays connected)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "TENEO_CONFIG")]
        config: Option<String>,

        /// Path to the local store holding userId
        #[arg(short, long)]
        store: Option<String>,
    },

    /// Manage the user id kept in the local store
    Identity {
        #[command(subcommand)]
        subcommand: IdentitySubcommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum IdentitySubcommand {
    /// Print the stored user id
    Show {
        /// Path to the local store
        #[arg(short, long)]
        store: Option<String>,
    },

    /// Save a user id to the local store
    Set {
        /// User id issued by Teneo
        user_id: String,

        /// Path to the local store
        #[arg(short, long)]
        store: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
