//! Tenant context resolution

use super::{AuthzError, DecisionReason, Principal};

/// Header naming the tenant a request acts in
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Validate a tenant identifier supplied by a client
pub fn parse_tenant_id(raw: &str) -> Result<String, AuthzError> {
    let raw = raw.trim();
    uuid::Uuid::parse_str(raw)
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| AuthzError::InvalidTenantId(raw.to_string()))
}

/// Work out which tenant a request acts in.
///
/// `requested` is whatever the request named (header, path or body). A
/// tenant-scoped API key pins the context to its own tenant: naming no tenant
/// selects it, naming a different one is a mismatch.
pub fn resolve_tenant(
    principal: &Principal,
    requested: Option<&str>,
) -> Result<Option<String>, AuthzError> {
    let requested = requested.map(parse_tenant_id).transpose()?;

    match (principal.pinned_tenant(), requested) {
        (Some(pinned), Some(requested)) if pinned != requested => {
            Err(AuthzError::Forbidden(DecisionReason::TenantMismatch))
        }
        (Some(pinned), _) => Ok(Some(pinned.to_string())),
        (None, requested) => Ok(requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiKey, ApiKeyScope, User};
    use chrono::Utc;

    const TENANT_A: &str = "3f2b8c1e-9d4a-4e5b-8f6a-1c2d3e4f5a6b";
    const TENANT_B: &str = "7a6b5c4d-3e2f-4a1b-9c8d-7e6f5a4b3c2d";

    fn pinned(tenant: &str) -> Principal {
        let user = User::new("ci@example.com", "hash");
        let now = Utc::now();
        let key = ApiKey {
            id: "key".to_string(),
            name: "ci".to_string(),
            description: None,
            key_prefix: "tk_00000".to_string(),
            key_hash: "hash".to_string(),
            user_id: user.id.clone(),
            tenant_id: Some(tenant.to_string()),
            scope: ApiKeyScope::Tenant,
            is_active: true,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        Principal::api_key(user, &key)
    }

    #[test]
    fn test_parse_tenant_id() {
        assert_eq!(parse_tenant_id(TENANT_A).unwrap(), TENANT_A);
        assert_eq!(
            parse_tenant_id(&TENANT_A.to_uppercase()).unwrap(),
            TENANT_A
        );
        assert!(matches!(
            parse_tenant_id("acme"),
            Err(AuthzError::InvalidTenantId(_))
        ));
    }

    #[test]
    fn test_session_uses_requested_tenant() {
        let principal = Principal::session(User::new("a@example.com", "hash"));
        assert_eq!(
            resolve_tenant(&principal, Some(TENANT_A)).unwrap().as_deref(),
            Some(TENANT_A)
        );
        assert_eq!(resolve_tenant(&principal, None).unwrap(), None);
        assert!(resolve_tenant(&principal, Some("not-a-uuid")).is_err());
    }

    #[test]
    fn test_pinned_key() {
        let principal = pinned(TENANT_A);
        assert_eq!(
            resolve_tenant(&principal, None).unwrap().as_deref(),
            Some(TENANT_A)
        );
        assert_eq!(
            resolve_tenant(&principal, Some(TENANT_A)).unwrap().as_deref(),
            Some(TENANT_A)
        );
        assert!(matches!(
            resolve_tenant(&principal, Some(TENANT_B)),
            Err(AuthzError::Forbidden(DecisionReason::TenantMismatch))
        ));
    }
}
