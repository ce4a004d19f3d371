//! # JWT Token Management
//!
//! Bearer-token verification and development token minting.
//!
//! ## Invariants
//! - Stateless validation (no store lookup)
//! - Expiry is not enforced here: whether an expired token is still
//!   accepted depends on its permissions, which the context resolver checks
//!   on every request

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::errors::{AuthError, AuthResult};

/// Verified claims carried by a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (caller identifier)
    pub sub: String,

    /// Granted permissions, API-scoped ones carry the package names
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Issued at timestamp (Unix epoch seconds); 0 when absent
    #[serde(default)]
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Audience, either one value or a list
    pub aud: Audience,

    /// Issuer
    #[serde(default)]
    pub iss: String,
}

/// The `aud` claim. Identity providers issuing tokens for several services
/// send a list; tokens minted here carry a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(one) => one == audience,
            Audience::Many(many) => many.iter().any(|a| a == audience),
        }
    }
}

impl From<&str> for Audience {
    fn from(audience: &str) -> Self {
        Audience::One(audience.to_string())
    }
}

impl JwtClaims {
    /// Expiration as a timestamp, if the token carries one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for signing (256-bit minimum recommended)
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Issuer identifier
    #[serde(default = "default_name")]
    pub issuer: String,

    /// Audience identifier
    #[serde(default = "default_name")]
    pub audience: String,
}

fn default_secret() -> String {
    "CHANGE_THIS_SECRET_IN_PRODUCTION".to_string()
}

fn default_name() -> String {
    "rowgate".to_string()
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            issuer: default_name(),
            audience: default_name(),
        }
    }
}

/// JWT manager for token generation and validation
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    /// Create a new JWT manager with the given configuration
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Mint a token for `subject` with the given permissions.
    ///
    /// `ttl` of `None` produces a token without an `exp` claim, which is
    /// only usable together with the never-expires permission.
    pub fn generate_token(
        &self,
        subject: &str,
        permissions: &[String],
        ttl: Option<Duration>,
    ) -> AuthResult<String> {
        let now = Utc::now();

        let claims = JwtClaims {
            sub: subject.to_string(),
            permissions: permissions.to_vec(),
            iat: now.timestamp(),
            exp: ttl.map(|ttl| (now + ttl).timestamp()),
            aud: Audience::from(self.config.audience.as_str()),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenGenerationFailed)
    }

    /// Verify signature, issuer and audience, then extract claims
    pub fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);

        let token_data =
            decode::<JwtClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    _ => AuthError::MalformedToken,
                }
            })?;

        Ok(token_data.claims)
    }
}
