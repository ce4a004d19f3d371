//! # Auth Module
//!
//! Bearer-token verification and the authorization context every query is
//! compiled under.

pub mod context;
pub mod errors;
pub mod jwt;

pub use context::{
    AuthorizationContext, ContextResolver, ANONYMOUS_PACKAGE, DEFAULT_API_SCOPE_PREFIX,
    DEFAULT_NEVER_EXPIRES_PERMISSION,
};
pub use errors::{AuthError, AuthResult};
pub use jwt::{Audience, JwtClaims, JwtConfig, JwtManager};
