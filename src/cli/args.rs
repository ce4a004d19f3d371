//! CLI argument definitions using clap
//!
//! Commands:
//! - rowgate start [--config <path>]
//! - rowgate compile [--config <path>] --table <name> [--permission <p>]...
//! - rowgate token [--config <path>] [--permission <p>]... [--ttl-minutes <n>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rowgate - policy-filtered query gateway for multi-tenant document stores
#[derive(Parser, Debug)]
#[command(name = "rowgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP gateway
    Start {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compile a query read from stdin and print the pipeline
    Compile {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Logical table to query
        #[arg(long)]
        table: String,

        /// Caller permission, repeatable
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },

    /// Mint a development token signed with the configured secret
    Token {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Token subject
        #[arg(long, default_value = "rowgate-cli")]
        subject: String,

        /// Granted permission, repeatable
        #[arg(long = "permission")]
        permissions: Vec<String>,

        /// Lifetime in minutes; omit for a token without expiry
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
