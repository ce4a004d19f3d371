//! # Authorization Context
//!
//! Derives the caller's packages from verified claims.
//!
//! ## Invariants
//! - Only permissions carrying the API-scope prefix name packages
//! - An empty package set becomes `{"anonymous"}`, never "everything"
//! - Expiry is checked on every resolution, against the caller's clock

use chrono::{DateTime, Utc};

use super::errors::{AuthError, AuthResult};
use super::jwt::JwtClaims;

/// Package used when a caller holds no API-scoped permission
pub const ANONYMOUS_PACKAGE: &str = "anonymous";

/// Prefix marking a permission as an API package grant
pub const DEFAULT_API_SCOPE_PREFIX: &str = "api:";

/// Permission exempting a token from expiry
pub const DEFAULT_NEVER_EXPIRES_PERMISSION: &str = "token:never-expires";

/// The packages a request is authorized under. Immutable per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    subject: String,
    packages: Vec<String>,
}

impl AuthorizationContext {
    /// Build a context from explicit packages; an empty list is anonymous
    pub fn new(subject: impl Into<String>, packages: Vec<String>) -> Self {
        let packages = if packages.is_empty() {
            vec![ANONYMOUS_PACKAGE.to_string()]
        } else {
            packages
        };
        Self {
            subject: subject.into(),
            packages,
        }
    }

    pub fn anonymous(subject: impl Into<String>) -> Self {
        Self::new(subject, Vec::new())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Package identifiers in grant order, never empty
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn is_anonymous(&self) -> bool {
        self.packages.len() == 1 && self.packages[0] == ANONYMOUS_PACKAGE
    }
}

/// Resolves claims into an [`AuthorizationContext`]
#[derive(Debug, Clone)]
pub struct ContextResolver {
    scope_prefix: String,
    never_expires_permission: String,
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self::new(DEFAULT_API_SCOPE_PREFIX, DEFAULT_NEVER_EXPIRES_PERMISSION)
    }
}

impl ContextResolver {
    pub fn new(scope_prefix: impl Into<String>, never_expires_permission: impl Into<String>) -> Self {
        Self {
            scope_prefix: scope_prefix.into(),
            never_expires_permission: never_expires_permission.into(),
        }
    }

    pub fn scope_prefix(&self) -> &str {
        &self.scope_prefix
    }

    /// Resolve against the current time
    pub fn resolve(&self, claims: &JwtClaims) -> AuthResult<AuthorizationContext> {
        self.resolve_at(claims, Utc::now())
    }

    /// Resolve as of `now`.
    ///
    /// A token without `exp` counts as expired unless it holds the
    /// never-expires permission.
    pub fn resolve_at(
        &self,
        claims: &JwtClaims,
        now: DateTime<Utc>,
    ) -> AuthResult<AuthorizationContext> {
        let exempt = claims
            .permissions
            .iter()
            .any(|p| *p == self.never_expires_permission);

        if !exempt {
            match claims.expires_at() {
                Some(expires_at) if expires_at > now => {}
                _ => {
                    tracing::info!(subject = %claims.sub, "rejected expired token");
                    return Err(AuthError::TokenExpired);
                }
            }
        }

        Ok(self.context_for(&claims.sub, &claims.permissions))
    }

    /// Packages named by `permissions`, with no expiry check
    pub fn context_for(&self, subject: &str, permissions: &[String]) -> AuthorizationContext {
        let mut packages: Vec<String> = Vec::new();
        for permission in permissions {
            let Some(package) = permission.strip_prefix(self.scope_prefix.as_str()) else {
                continue;
            };
            if !package.is_empty() && !packages.iter().any(|p| p == package) {
                packages.push(package.to_string());
            }
        }

        AuthorizationContext::new(subject, packages)
    }
}
