//! Authentication for tenantry
//!
//! Turns presented credentials into a [`crate::authz::Principal`]:
//! - Password login issuing opaque, expiring session tokens
//! - API keys (`tk_...`), stored only as SHA-256 hashes
//! - Credential extraction from `Authorization`, `X-API-Key` or `?api_key=`
//! - Per-client login rate limiting

mod authenticator;
mod middleware;
mod password;
mod rate_limit;
mod sessions;
mod tokens;

pub use authenticator::{Authenticator, LoginOutcome};
pub use middleware::{extract_bearer, extract_credential, PresentedCredential};
pub use password::{hash_password, validate_password, verify_password, MIN_PASSWORD_LENGTH};
pub use rate_limit::LoginRateLimiter;
pub use sessions::{Session, SessionStore};
pub use tokens::{
    generate_api_key, generate_invitation_token, generate_session_token, hash_token,
    API_KEY_PREFIX, DISPLAY_PREFIX_LEN, SESSION_TOKEN_PREFIX,
};

use crate::storage::StorageError;
use thiserror::Error;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication: Authorization header or API key required")]
    MissingCredentials,

    #[error("Invalid authentication scheme: expected 'Bearer'")]
    InvalidScheme,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Invalid or unknown token")]
    InvalidToken,

    #[error("Session expired")]
    TokenExpired,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API key expired")]
    ApiKeyExpired,

    #[error("User account is inactive")]
    InactiveUser,

    #[error("Too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Password rejected: {0}")]
    WeakPassword(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
