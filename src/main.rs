//! rowgate CLI entry point
//!
//! Parses arguments and dispatches via `cli::run`. Errors go to stdout as
//! JSON and to stderr as text; the process exits non-zero.

use rowgate::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
