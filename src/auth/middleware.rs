//! Credential extraction from requests
//!
//! Provides functions for:
//! - Parsing `Authorization: Bearer ...`
//! - Falling back to `X-API-Key` and the `api_key` query parameter
//! - Telling session tokens from API keys

use super::tokens::SESSION_TOKEN_PREFIX;
use super::AuthError;

/// A credential as presented by a client, not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedCredential {
    SessionToken(String),
    ApiKey(String),
}

impl PresentedCredential {
    /// Classify a bearer token by its prefix
    pub fn from_bearer(token: String) -> Self {
        if token.starts_with(SESSION_TOKEN_PREFIX) {
            PresentedCredential::SessionToken(token)
        } else {
            PresentedCredential::ApiKey(token)
        }
    }
}

/// Extract the token from an Authorization header
///
/// Expected format: `Authorization: Bearer ts_...` or `Bearer tk_...`
pub fn extract_bearer(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header = auth_header.ok_or(AuthError::MissingCredentials)?;

    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidScheme)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }

    Ok(token.to_string())
}

/// Find the request's credential.
///
/// The Authorization header wins; then `X-API-Key`; then the `api_key` query
/// parameter. Blank values count as absent.
pub fn extract_credential(
    auth_header: Option<&str>,
    api_key_header: Option<&str>,
    api_key_query: Option<&str>,
) -> Result<PresentedCredential, AuthError> {
    if auth_header.is_some_and(|h| !h.trim().is_empty()) {
        return extract_bearer(auth_header).map(PresentedCredential::from_bearer);
    }

    [api_key_header, api_key_query]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty())
        .map(|k| PresentedCredential::ApiKey(k.to_string()))
        .ok_or(AuthError::MissingCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_valid() {
        assert_eq!(extract_bearer(Some("Bearer tk_abc123")).unwrap(), "tk_abc123");
    }

    #[test]
    fn test_extract_bearer_case_insensitive() {
        assert_eq!(extract_bearer(Some("bearer tk_abc123")).unwrap(), "tk_abc123");
        assert_eq!(extract_bearer(Some("BEARER tk_abc123")).unwrap(), "tk_abc123");
    }

    #[test]
    fn test_extract_bearer_missing() {
        assert!(matches!(
            extract_bearer(None),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_extract_bearer_wrong_scheme() {
        assert!(matches!(
            extract_bearer(Some("Basic abc123")),
            Err(AuthError::InvalidScheme)
        ));
        assert!(matches!(
            extract_bearer(Some("tk_abc123")),
            Err(AuthError::InvalidScheme)
        ));
    }

    #[test]
    fn test_bearer_classification() {
        assert_eq!(
            extract_credential(Some("Bearer ts_session"), None, None).unwrap(),
            PresentedCredential::SessionToken("ts_session".to_string())
        );
        assert_eq!(
            extract_credential(Some("Bearer tk_key"), None, None).unwrap(),
            PresentedCredential::ApiKey("tk_key".to_string())
        );
    }

    #[test]
    fn test_api_key_fallbacks() {
        assert_eq!(
            extract_credential(None, Some("tk_header"), Some("tk_query")).unwrap(),
            PresentedCredential::ApiKey("tk_header".to_string())
        );
        assert_eq!(
            extract_credential(Some("  "), Some(""), Some("tk_query")).unwrap(),
            PresentedCredential::ApiKey("tk_query".to_string())
        );
        assert!(matches!(
            extract_credential(None, None, None),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_authorization_header_wins() {
        assert_eq!(
            extract_credential(Some("Bearer ts_s"), Some("tk_header"), None).unwrap(),
            PresentedCredential::SessionToken("ts_s".to_string())
        );
        assert!(matches!(
            extract_credential(Some("Basic x"), Some("tk_header"), None),
            Err(AuthError::InvalidScheme)
        ));
    }
}
