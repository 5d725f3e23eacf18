//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutual-TLS gateway that authorizes every connection against the Connect Authorize endpoint
#[derive(Parser, Debug)]
#[command(name = "connect-authz-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CONNECT_AUTHZ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Address to accept TLS connections on (overrides `listener.address`)
    #[arg(long, env = "CONNECT_AUTHZ_LISTEN")]
    pub listen: Option<String>,

    /// Admin listener address (overrides `admin.address`)
    #[arg(long)]
    pub admin: Option<String>,

    /// Service name sent as `Target` (overrides `authorize.target`)
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CONNECT_AUTHZ_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CONNECT_AUTHZ_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Ask the Authorize endpoint for one verdict and print it.
    ///
    /// Exits 0 when authorized, 1 otherwise.
    Authorize {
        /// Client certificate URI SAN
        #[arg(long)]
        uri: String,

        /// Client certificate serial, colon-hex
        #[arg(long)]
        serial: String,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}
