//! CLI command implementations
//!
//! `start` serves the gateway over HTTP. `compile` and `token` are one-shot
//! helpers for administrators writing and testing grants.

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServiceConfig;
use crate::http_server::HttpServer;
use crate::store::InMemoryStore;
use crate::value::QueryValue;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_query, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Start { config } => start(config.as_deref()),
        Command::Compile {
            config,
            table,
            permissions,
        } => compile(config.as_deref(), &table, &permissions),
        Command::Token {
            config,
            subject,
            permissions,
            ttl_minutes,
        } => token(config.as_deref(), &subject, &permissions, ttl_minutes),
    }
}

/// Load the config file if given, otherwise defaults plus environment
fn load_config(config_path: Option<&Path>) -> CliResult<ServiceConfig> {
    let config = match config_path {
        Some(path) => ServiceConfig::load(path)?,
        None => {
            let mut config = ServiceConfig::default();
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn init_tracing() {
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rowgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::serve_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// Open the store and serve the gateway until interrupted
pub fn start(config_path: Option<&Path>) -> CliResult<()> {
    init_tracing();

    let config = load_config(config_path)?;
    let store = Arc::new(InMemoryStore::open(config.seed_path.as_deref())?);
    let state = Arc::new(config.gateway_state(store.clone()));
    let server = HttpServer::new(config.server.clone(), state)
        .map_err(|e| CliError::serve_failed(e.to_string()))?;

    tracing::info!(
        addr = %server.socket_addr(),
        enforce_row_limit = config.enforce_row_limit,
        "starting query gateway"
    );

    runtime()?.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::serve_failed(format!("HTTP server failed: {}", e)))
    })?;

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close();
    }
    Ok(())
}

/// Compile a query from stdin for the given permissions and print it
pub fn compile(config_path: Option<&Path>, table: &str, permissions: &[String]) -> CliResult<()> {
    let config = load_config(config_path)?;
    let query = read_query()?.map(QueryValue::from);

    let store = Arc::new(InMemoryStore::open(config.seed_path.as_deref())?);
    let compiler = config.compiler(store);
    let ctx = config.context_resolver().context_for("rowgate-cli", permissions);

    let compiled = runtime()?.block_on(compiler.compile(table, &ctx, query))?;

    write_response(json!({
        "table": &compiled.table,
        "packages": ctx.packages(),
        "collection": compiled.collection_name(),
        "usingDefaultCollection": compiled.collection.using_default,
        "pipeline": compiled.pipeline_json(),
    }))
}

/// Mint a development token
pub fn token(
    config_path: Option<&Path>,
    subject: &str,
    permissions: &[String],
    ttl_minutes: Option<i64>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let jwt = config.jwt_manager();

    let token = jwt.generate_token(subject, permissions, ttl_minutes.map(Duration::minutes))?;
    let claims = jwt.validate_token(&token)?;
    let expires_at = claims.expires_at().map(|t| t.to_rfc3339());

    write_response(json!({
        "token": token,
        "subject": claims.sub,
        "permissions": claims.permissions,
        "expiresAt": expires_at,
    }))
}
