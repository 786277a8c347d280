use crate::model::{ApiKey, ApiKeyScope, User};

/// How the principal authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Session,
    ApiKey {
        key_id: String,
        scope: ApiKeyScope,
        /// Set for tenant-scoped keys
        tenant_id: Option<String>,
    },
}

/// The authenticated actor of a request
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub credential: Credential,
}

impl Principal {
    pub fn session(user: User) -> Self {
        Self {
            user,
            credential: Credential::Session,
        }
    }

    pub fn api_key(user: User, key: &ApiKey) -> Self {
        Self {
            user,
            credential: Credential::ApiKey {
                key_id: key.id.clone(),
                scope: key.scope,
                tenant_id: match key.scope {
                    ApiKeyScope::Tenant => key.tenant_id.clone(),
                    ApiKeyScope::Global => None,
                },
            },
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_superuser(&self) -> bool {
        self.user.is_superuser
    }

    pub fn is_active(&self) -> bool {
        self.user.is_active
    }

    /// The tenant a tenant-scoped API key is bound to
    pub fn pinned_tenant(&self) -> Option<&str> {
        match &self.credential {
            Credential::ApiKey {
                scope: ApiKeyScope::Tenant,
                tenant_id,
                ..
            } => tenant_id.as_deref(),
            _ => None,
        }
    }

    /// Superuser reached through a session or a global key
    pub fn has_global_access(&self) -> bool {
        self.is_superuser() && self.pinned_tenant().is_none()
    }

    pub fn api_key_id(&self) -> Option<&str> {
        match &self.credential {
            Credential::ApiKey { key_id, .. } => Some(key_id),
            Credential::Session => None,
        }
    }
}
