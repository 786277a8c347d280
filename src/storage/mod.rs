//! Storage backends for IAM records
//!
//! Provides the [`StorageBackend`] trait and two implementations: a JSON
//! snapshot store ([`FileStorage`]) and a SQLite store ([`SqliteStorage`]).
//!
//! Backends enforce uniqueness and cascading deletes. They do not enforce
//! access rules; that is the job of [`crate::authz`] and [`crate::service`].

mod file;
mod sqlite;

pub use file::FileStorage;
pub use sqlite::SqliteStorage;

use crate::model::{ApiKey, Invitation, PermissionRecord, Role, RoleAssignment, Tenant, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::AlreadyExists(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::Unavailable(err.to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

/// Trait for IAM storage backends
///
/// List operations return records in creation order unless noted.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Check if the storage backend is available and healthy
    async fn health_check(&self) -> Result<(), StorageError>;

    // ==================== Tenants ====================

    /// Insert a tenant. Name and slug must both be unused
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), StorageError>;

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, StorageError>;

    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError>;

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StorageError>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError>;

    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), StorageError>;

    /// Delete a tenant with its assignments, tenant-scoped API keys and invitations
    async fn delete_tenant(&self, id: &str) -> Result<(), StorageError>;

    // ==================== Users ====================

    /// Insert a user. Email uniqueness ignores ASCII case
    async fn create_user(&self, user: &User) -> Result<(), StorageError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    async fn list_users(&self) -> Result<Vec<User>, StorageError>;

    async fn update_user(&self, user: &User) -> Result<(), StorageError>;

    /// Delete a user with their assignments and API keys
    async fn delete_user(&self, id: &str) -> Result<(), StorageError>;

    // ==================== Roles ====================

    async fn create_role(&self, role: &Role) -> Result<(), StorageError>;

    async fn get_role(&self, id: &str) -> Result<Option<Role>, StorageError>;

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StorageError>;

    /// List all roles ordered by name
    async fn list_roles(&self) -> Result<Vec<Role>, StorageError>;

    async fn update_role(&self, role: &Role) -> Result<(), StorageError>;

    /// Delete a role with its assignments and permission grants; invitations
    /// that referenced it lose their role
    async fn delete_role(&self, id: &str) -> Result<(), StorageError>;

    // ==================== Permission catalog ====================

    async fn create_permission(&self, permission: &PermissionRecord) -> Result<(), StorageError>;

    async fn get_permission(&self, id: &str) -> Result<Option<PermissionRecord>, StorageError>;

    async fn get_permission_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PermissionRecord>, StorageError>;

    /// List the catalog ordered by code
    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, StorageError>;

    /// Grant a permission to a role. Returns false if it was already granted
    async fn add_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError>;

    /// Returns false if the permission was not granted
    async fn remove_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError>;

    /// Permissions granted to a role, ordered by code
    async fn list_role_permissions(
        &self,
        role_id: &str,
    ) -> Result<Vec<PermissionRecord>, StorageError>;

    // ==================== Role assignments ====================

    /// Assign a role to a user in a tenant. Returns false if already assigned
    async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, StorageError>;

    /// Returns false if the assignment did not exist
    async fn remove_role_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<bool, StorageError>;

    /// Remove every assignment of a user in a tenant, returning how many went
    async fn remove_user_from_tenant(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<usize, StorageError>;

    /// Roles assigned to a user in one tenant, ordered by name
    async fn list_user_roles(&self, user_id: &str, tenant_id: &str)
        -> Result<Vec<Role>, StorageError>;

    async fn list_tenant_assignments(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<RoleAssignment>, StorageError>;

    async fn list_user_assignments(&self, user_id: &str)
        -> Result<Vec<RoleAssignment>, StorageError>;

    /// Distinct permission codes granted through every role the user holds in
    /// the tenant, ordered by code
    async fn list_user_permission_codes(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, StorageError>;

    // ==================== API keys ====================

    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StorageError>;

    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKey>, StorageError>;

    async fn get_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>, StorageError>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StorageError>;

    async fn update_api_key(&self, key: &ApiKey) -> Result<(), StorageError>;

    async fn delete_api_key(&self, id: &str) -> Result<(), StorageError>;

    /// Update an API key's last used timestamp
    async fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;

    // ==================== Invitations ====================

    async fn create_invitation(&self, invitation: &Invitation) -> Result<(), StorageError>;

    async fn get_invitation(&self, id: &str) -> Result<Option<Invitation>, StorageError>;

    async fn get_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, StorageError>;

    /// Invitations of a tenant, newest first
    async fn list_invitations(&self, tenant_id: &str) -> Result<Vec<Invitation>, StorageError>;

    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), StorageError>;
}
