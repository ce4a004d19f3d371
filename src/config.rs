//! # Service Configuration
//!
//! A single JSON file; every field has a default, so `{}` is a valid
//! configuration. A few fields can be overridden from the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{
    ContextResolver, JwtConfig, JwtManager, DEFAULT_API_SCOPE_PREFIX,
    DEFAULT_NEVER_EXPIRES_PERMISSION,
};
use crate::http_server::response::DEFAULT_DATE_FORMAT;
use crate::http_server::{GatewayState, HttpServerConfig};
use crate::query::{
    CompilerConfig, PredicateStore, QueryCompiler, DEFAULT_META_COLLECTION,
    DEFAULT_SECURITY_COLLECTION,
};
use crate::store::DocumentStore;

/// Overrides the listening port
pub const ENV_PORT: &str = "ROWGATE_PORT";

/// Overrides the token signing secret
pub const ENV_JWT_SECRET: &str = "ROWGATE_JWT_SECRET";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Invalid config JSON: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub jwt: JwtConfig,

    /// Permissions with this prefix name packages
    #[serde(default = "default_api_scope_prefix")]
    pub api_scope_prefix: String,

    /// Permission that exempts a token from expiry
    #[serde(default = "default_never_expires_permission")]
    pub never_expires_permission: String,

    /// Cap result rows at the largest grant's row limit
    #[serde(default)]
    pub enforce_row_limit: bool,

    /// JSON file of collections loaded into the store at startup
    #[serde(default)]
    pub seed_path: Option<PathBuf>,

    #[serde(default = "default_security_collection")]
    pub security_collection: String,

    #[serde(default = "default_meta_collection")]
    pub meta_collection: String,

    /// strftime format for top-level dates in result rows
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_api_scope_prefix() -> String {
    DEFAULT_API_SCOPE_PREFIX.to_string()
}
fn default_never_expires_permission() -> String {
    DEFAULT_NEVER_EXPIRES_PERMISSION.to_string()
}
fn default_security_collection() -> String {
    DEFAULT_SECURITY_COLLECTION.to_string()
}
fn default_meta_collection() -> String {
    DEFAULT_META_COLLECTION.to_string()
}
fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: HttpServerConfig::default(),
            jwt: JwtConfig::default(),
            api_scope_prefix: default_api_scope_prefix(),
            never_expires_permission: default_never_expires_permission(),
            enforce_row_limit: false,
            seed_path: None,
            security_collection: default_security_collection(),
            meta_collection: default_meta_collection(),
            date_format: default_date_format(),
        }
    }
}

impl ServiceConfig {
    /// Load from file, apply environment overrides, then validate.
    ///
    /// A relative `seed_path` is resolved against the config file's directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: ServiceConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let (Some(seed), Some(dir)) = (&config.seed_path, path.parent()) {
            if seed.is_relative() {
                config.seed_path = Some(dir.join(seed));
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} is not a port: '{}'", ENV_PORT, port)))?;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.jwt.secret = secret;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Invalid("jwt.secret must not be empty".to_string()));
        }
        if self.api_scope_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "api_scope_prefix must not be empty".to_string(),
            ));
        }
        if self.security_collection.is_empty() || self.meta_collection.is_empty() {
            return Err(ConfigError::Invalid(
                "security_collection and meta_collection must not be empty".to_string(),
            ));
        }
        self.server
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid(format!(
                "date_format is not a valid format string: '{}'",
                self.date_format
            )));
        }
        Ok(())
    }

    pub fn compiler(&self, store: Arc<dyn DocumentStore>) -> QueryCompiler {
        let predicates = PredicateStore::new(store)
            .with_collections(&self.security_collection, &self.meta_collection);
        QueryCompiler::new(
            predicates,
            CompilerConfig {
                enforce_row_limit: self.enforce_row_limit,
            },
        )
    }

    pub fn context_resolver(&self) -> ContextResolver {
        ContextResolver::new(&self.api_scope_prefix, &self.never_expires_permission)
    }

    pub fn jwt_manager(&self) -> JwtManager {
        JwtManager::new(self.jwt.clone())
    }

    /// Everything the gateway routes need, over `store`
    pub fn gateway_state(&self, store: Arc<dyn DocumentStore>) -> GatewayState {
        GatewayState::new(
            self.compiler(store),
            self.jwt_manager(),
            self.context_resolver(),
            &self.date_format,
        )
    }
}
