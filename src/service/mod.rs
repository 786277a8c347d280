//! Identity and access management operations
//!
//! [`IamService`] is the facade handlers and the CLI go through. Each area
//! (tenants, users, roles, ...) lives in its own submodule as an `impl` block.
//! Permission checks against the tenant happen in the web layer through
//! [`Authorizer`]; the service enforces ownership and data rules.

mod api_keys;
mod bootstrap;
mod invitations;
mod permissions;
mod roles;
mod tenants;
mod users;

pub use api_keys::{ApiKeyUpdate, CreatedApiKey, NewApiKey};
pub use bootstrap::BootstrapReport;
pub use invitations::{AcceptInvitation, AcceptedInvitation, InvitationDetail, IssuedInvitation, NewInvitation};
pub use roles::{NewRole, RoleDetail, RoleUpdate};
pub use tenants::{NewTenant, TenantUpdate};
pub use users::{MemberView, NewUser, UserUpdate};

use crate::auth::AuthError;
use crate::authz::{Authorizer, AuthzError};
use crate::config::{AuthConfig, InvitationConfig};
use crate::storage::{StorageBackend, StorageError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AlreadyExists(what) => ServiceError::Conflict(what),
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn not_found(what: &str, id: &str) -> ServiceError {
    ServiceError::NotFound(format!("{} '{}'", what, id))
}

/// Trim a required text field, rejecting blanks
fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

/// Blank optional text becomes None
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct IamService {
    storage: Arc<dyn StorageBackend>,
    authz: Authorizer,
    bcrypt_cost: u32,
    invitations: InvitationConfig,
}

impl IamService {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        auth: &AuthConfig,
        invitations: InvitationConfig,
    ) -> Self {
        Self {
            authz: Authorizer::new(storage.clone()),
            storage,
            bcrypt_cost: auth.bcrypt_cost,
            invitations,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authz
    }

    pub async fn health_check(&self) -> Result<()> {
        Ok(self.storage.health_check().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::authz::Principal;
    use crate::config::Config;
    use crate::model::{Tenant, User};
    use crate::storage::FileStorage;

    /// A seeded service over in-memory storage
    pub async fn service() -> IamService {
        let config = Config::default();
        let mut auth = config.auth.clone();
        auth.bcrypt_cost = 4;
        let service = IamService::new(
            Arc::new(FileStorage::in_memory()),
            &auth,
            config.invitations.clone(),
        );
        service.seed_system_roles().await.unwrap();
        service
    }

    pub async fn tenant(service: &IamService, name: &str) -> Tenant {
        service
            .create_tenant(NewTenant {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn user(service: &IamService, email: &str) -> User {
        service
            .create_user(NewUser {
                email: email.to_string(),
                password: "password123".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn superuser(service: &IamService) -> Principal {
        let user = service
            .create_user(NewUser {
                email: "root@example.com".to_string(),
                password: "password123".to_string(),
                is_superuser: true,
                ..Default::default()
            })
            .await
            .unwrap();
        Principal::session(user)
    }

    /// Assign a built-in role by name
    pub async fn grant(service: &IamService, user: &User, tenant: &Tenant, role: &str) {
        let role = service.storage().get_role_by_name(role).await.unwrap().unwrap();
        service.assign_role(&user.id, &tenant.id, &role.id).await.unwrap();
    }
}
