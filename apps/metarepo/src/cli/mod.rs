//! # Metarepo CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show repository identity and store sequence
//! - `types` - List the loaded type definitions
//! - `apply` - Run operation requests from a JSON file
//! - `get` - Show the current state of an entity or relationship
//! - `history` - Show the stored versions of an instance
//! - `init` - Initialize a new database

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use metarepo_core::MetarepoError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Metarepo - versioned, replicated metadata repository
#[derive(Parser, Debug)]
#[command(name = "metarepo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: $METAREPO_CONFIG, then ./metarepo.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (default: [server] host)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (default: [server] port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show repository identity and store sequence
    Status,

    /// List the loaded type definitions
    Types,

    /// Run operation requests from a JSON file (one request or an array)
    Apply {
        /// Path to the request file
        #[arg(short, long)]
        file: PathBuf,

        /// User recorded on the writes (default: [repository] default_user)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show the current state of an entity or relationship
    Get {
        #[arg(short, long)]
        guid: String,

        /// Look the guid up as a relationship
        #[arg(short, long)]
        relationship: bool,
    },

    /// Show the stored versions of an instance, newest first
    History {
        #[arg(short, long)]
        guid: String,

        /// Maximum number of versions
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Initialize a new empty database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), MetarepoError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.storage.path = database;
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            cmd_server(&config, &host, port).await
        }
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
        Some(Commands::Types) => cmd_types(&config, json_mode),
        Some(Commands::Apply { file, user }) => {
            let user = user.unwrap_or_else(|| config.repository.default_user.clone());
            cmd_apply(&config, json_mode, &file, &user)
        }
        Some(Commands::Get { guid, relationship }) => {
            cmd_get(&config, json_mode, &guid, relationship)
        }
        Some(Commands::History { guid, limit }) => cmd_history(&config, json_mode, &guid, limit),
        Some(Commands::Init { force }) => cmd_init(&config, force),
    }
}
