//! Random credential generation and hashing

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// API key prefix
pub const API_KEY_PREFIX: &str = "tk_";

/// Session token prefix, used to tell sessions from API keys in a Bearer header
pub const SESSION_TOKEN_PREFIX: &str = "ts_";

/// Characters of an API key kept for display and lookup
pub const DISPLAY_PREFIX_LEN: usize = 8;

/// Random bytes behind every generated credential
const RANDOM_BYTES: usize = 32;

fn random_bytes() -> [u8; RANDOM_BYTES] {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a new API key.
///
/// Returns the full key (shown to the caller once) and its display prefix.
pub fn generate_api_key() -> (String, String) {
    let full_key = format!("{}{}", API_KEY_PREFIX, hex::encode(random_bytes()));
    let prefix = full_key[..DISPLAY_PREFIX_LEN].to_string();
    (full_key, prefix)
}

/// Generate an opaque session token
pub fn generate_session_token() -> String {
    format!("{}{}", SESSION_TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(random_bytes()))
}

/// Generate a URL-safe invitation token
pub fn generate_invitation_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes())
}

/// SHA-256 hex digest; the only form in which credentials are stored
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
