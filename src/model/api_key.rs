use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where an API key may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiKeyScope {
    /// Acts with the owner's access in whatever tenant the request names
    Global,
    /// Pinned to a single tenant
    Tenant,
}

impl Default for ApiKeyScope {
    fn default() -> Self {
        ApiKeyScope::Tenant
    }
}

impl fmt::Display for ApiKeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKeyScope::Global => write!(f, "GLOBAL"),
            ApiKeyScope::Tenant => write!(f, "TENANT"),
        }
    }
}

impl FromStr for ApiKeyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(ApiKeyScope::Global),
            "TENANT" => Ok(ApiKeyScope::Tenant),
            other => Err(format!("Unknown API key scope: {}", other)),
        }
    }
}

/// A stored API key. Only the hash of the key is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// First 8 characters of the key, for display and lookup
    pub key_prefix: String,
    /// SHA-256 hex digest of the full key
    pub key_hash: String,
    /// Owner; the key acts with this user's access
    pub user_id: String,
    /// Set iff `scope` is `Tenant`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub scope: ApiKeyScope,
    pub is_active: bool,
    /// None = never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Check if the key has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Get a display-safe version of the key (prefix only)
    pub fn display_key(&self) -> String {
        format!("{}...", self.key_prefix)
    }
}

/// An API key as returned by the API (no hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub key_prefix: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub scope: ApiKeyScope,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyView {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id.clone(),
            name: key.name.clone(),
            description: key.description.clone(),
            key_prefix: key.key_prefix.clone(),
            user_id: key.user_id.clone(),
            tenant_id: key.tenant_id.clone(),
            scope: key.scope,
            is_active: key.is_active,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_at: Option<DateTime<Utc>>) -> ApiKey {
        let now = Utc::now();
        ApiKey {
            id: "key-1".to_string(),
            name: "ci".to_string(),
            description: None,
            key_prefix: "tk_abcde".to_string(),
            key_hash: "hash".to_string(),
            user_id: "user-1".to_string(),
            tenant_id: None,
            scope: ApiKeyScope::Global,
            is_active: true,
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_api_key_expiration() {
        let now = Utc::now();
        assert!(!key(None).is_expired(now));
        assert!(!key(Some(now + Duration::hours(1))).is_expired(now));
        assert!(key(Some(now - Duration::hours(1))).is_expired(now));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("global".parse::<ApiKeyScope>(), Ok(ApiKeyScope::Global));
        assert_eq!("TENANT".parse::<ApiKeyScope>(), Ok(ApiKeyScope::Tenant));
        assert!("org".parse::<ApiKeyScope>().is_err());
        assert_eq!(serde_json::to_string(&ApiKeyScope::Global).unwrap(), "\"GLOBAL\"");
    }

    #[test]
    fn test_view_omits_hash() {
        let json = serde_json::to_string(&ApiKeyView::from(&key(None))).unwrap();
        assert!(json.contains("tk_abcde"));
        assert!(!json.contains("\"key_hash\""));
    }
}
