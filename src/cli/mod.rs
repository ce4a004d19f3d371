//! CLI module for rowgate
//!
//! Provides command-line interface for:
//! - start: Serve the query gateway over HTTP
//! - compile: One-shot query compilation
//! - token: Mint a development token

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{compile, run, run_command, start, token};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_query, write_error, write_response};
