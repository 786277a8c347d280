//! tenantry - multi-tenant identity and access management
//!
//! Users belong to tenants through role assignments, and every request is
//! authorized against the permissions its roles grant inside the tenant named
//! by the `X-Tenant-ID` header. Superusers bypass tenant checks, and API keys
//! can be pinned to a single tenant.

pub mod auth;
pub mod authz;
pub mod config;
pub mod model;
pub mod permissions;
pub mod service;
pub mod storage;
pub mod web;

use thiserror::Error;

/// Core error types for tenantry
#[derive(Error, Debug)]
pub enum TenantryError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("Authorization error: {0}")]
    Authz(#[from] authz::AuthzError),

    #[error(transparent)]
    Service(#[from] service::ServiceError),
}
