//! Permission catalog for tenantry RBAC
//!
//! Provides:
//! - Permission enum with `resource:action` string form
//! - PermissionScope to tell global-only permissions from tenant-scoped ones
//! - Built-in system roles with fixed permission sets

mod roles;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub use roles::{system_role, system_roles, SystemRole, ROLE_ADMIN, ROLE_TENANT_ADMIN, ROLE_USER, ROLE_VIEWER};

/// Atomic capabilities that roles grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    UserRead,
    UserCreate,
    UserUpdate,
    UserDelete,

    TenantRead,
    TenantCreate,
    TenantUpdate,
    TenantDelete,
    /// Create, list and revoke invitations to the tenant
    TenantManageInvitations,

    ApiKeyRead,
    ApiKeyCreate,
    ApiKeyUpdate,
    ApiKeyDelete,

    VmRead,
    VmCreate,
    VmUpdate,
    VmDelete,
    VmStart,
    VmStop,
    VmRestart,

    RoleRead,
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    /// Grant or remove roles of users within a tenant
    RoleAssign,

    PermissionRead,
    /// Attach or detach permissions on role definitions
    PermissionAssign,
}

/// Where a permission can be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    /// Only superusers hold it; tenant roles never grant it
    Global,
    /// Granted through roles assigned within a tenant
    Tenant,
}

impl Permission {
    /// Every permission in catalog order
    pub const ALL: [Permission; 27] = [
        Permission::UserRead,
        Permission::UserCreate,
        Permission::UserUpdate,
        Permission::UserDelete,
        Permission::TenantRead,
        Permission::TenantCreate,
        Permission::TenantUpdate,
        Permission::TenantDelete,
        Permission::TenantManageInvitations,
        Permission::ApiKeyRead,
        Permission::ApiKeyCreate,
        Permission::ApiKeyUpdate,
        Permission::ApiKeyDelete,
        Permission::VmRead,
        Permission::VmCreate,
        Permission::VmUpdate,
        Permission::VmDelete,
        Permission::VmStart,
        Permission::VmStop,
        Permission::VmRestart,
        Permission::RoleRead,
        Permission::RoleCreate,
        Permission::RoleUpdate,
        Permission::RoleDelete,
        Permission::RoleAssign,
        Permission::PermissionRead,
        Permission::PermissionAssign,
    ];

    /// Get all possible permissions
    pub fn all() -> HashSet<Permission> {
        Self::ALL.into_iter().collect()
    }

    /// The `resource:action` code
    pub fn code(&self) -> &'static str {
        match self {
            Permission::UserRead => "user:read",
            Permission::UserCreate => "user:create",
            Permission::UserUpdate => "user:update",
            Permission::UserDelete => "user:delete",
            Permission::TenantRead => "tenant:read",
            Permission::TenantCreate => "tenant:create",
            Permission::TenantUpdate => "tenant:update",
            Permission::TenantDelete => "tenant:delete",
            Permission::TenantManageInvitations => "tenant:manage_invitations",
            Permission::ApiKeyRead => "api_key:read",
            Permission::ApiKeyCreate => "api_key:create",
            Permission::ApiKeyUpdate => "api_key:update",
            Permission::ApiKeyDelete => "api_key:delete",
            Permission::VmRead => "vm:read",
            Permission::VmCreate => "vm:create",
            Permission::VmUpdate => "vm:update",
            Permission::VmDelete => "vm:delete",
            Permission::VmStart => "vm:start",
            Permission::VmStop => "vm:stop",
            Permission::VmRestart => "vm:restart",
            Permission::RoleRead => "role:read",
            Permission::RoleCreate => "role:create",
            Permission::RoleUpdate => "role:update",
            Permission::RoleDelete => "role:delete",
            Permission::RoleAssign => "role:assign",
            Permission::PermissionRead => "permission:read",
            Permission::PermissionAssign => "permission:assign",
        }
    }

    /// Human-readable label stored in the catalog
    pub fn label(&self) -> String {
        let (resource, action) = self.code().split_once(':').unwrap_or((self.code(), ""));
        let resource = resource.replace('_', " ");
        let action = action.replace('_', " ");
        let mut label = String::with_capacity(resource.len() + action.len() + 1);
        let mut chars = action.chars();
        if let Some(first) = chars.next() {
            label.extend(first.to_uppercase());
            label.push_str(chars.as_str());
            label.push(' ');
        }
        label.push_str(&resource);
        label
    }

    pub fn scope(&self) -> PermissionScope {
        match self {
            Permission::TenantCreate
            | Permission::RoleCreate
            | Permission::RoleUpdate
            | Permission::RoleDelete
            | Permission::PermissionAssign => PermissionScope::Global,
            _ => PermissionScope::Tenant,
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope() == PermissionScope::Global
    }

    /// Parse multiple permissions from comma-separated string
    pub fn parse_many(s: &str) -> Result<HashSet<Permission>, String> {
        let mut permissions = HashSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            permissions.insert(part.parse::<Permission>()?);
        }
        Ok(permissions)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Permission::ALL
            .into_iter()
            .find(|p| p.code() == wanted)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        code.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parsing() {
        assert_eq!("vm:read".parse::<Permission>(), Ok(Permission::VmRead));
        assert_eq!("ROLE:ASSIGN".parse::<Permission>(), Ok(Permission::RoleAssign));
        assert_eq!(
            "tenant:manage_invitations".parse::<Permission>(),
            Ok(Permission::TenantManageInvitations)
        );
        assert!("vm:fly".parse::<Permission>().is_err());
        assert!("read".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_parse_many() {
        let perms = Permission::parse_many("user:read, vm:start,, api_key:delete").unwrap();
        assert_eq!(perms.len(), 3);
        assert!(perms.contains(&Permission::VmStart));
        assert!(!perms.contains(&Permission::VmStop));

        assert!(Permission::parse_many("user:read, nope").is_err());
    }

    #[test]
    fn test_codes_are_unique_and_round_trip() {
        let codes: HashSet<&str> = Permission::ALL.iter().map(|p| p.code()).collect();
        assert_eq!(codes.len(), Permission::ALL.len());
        for p in Permission::ALL {
            assert_eq!(p.to_string().parse::<Permission>(), Ok(p));
        }
    }

    #[test]
    fn test_global_scope() {
        let global: Vec<Permission> = Permission::ALL.into_iter().filter(|p| p.is_global()).collect();
        assert_eq!(
            global,
            vec![
                Permission::TenantCreate,
                Permission::RoleCreate,
                Permission::RoleUpdate,
                Permission::RoleDelete,
                Permission::PermissionAssign,
            ]
        );
        assert_eq!(Permission::RoleAssign.scope(), PermissionScope::Tenant);
    }

    #[test]
    fn test_label() {
        assert_eq!(Permission::VmRead.label(), "Read vm");
        assert_eq!(Permission::ApiKeyCreate.label(), "Create api key");
        assert_eq!(
            Permission::TenantManageInvitations.label(),
            "Manage invitations tenant"
        );
    }

    #[test]
    fn test_serde_uses_code() {
        let json = serde_json::to_string(&Permission::ApiKeyRead).unwrap();
        assert_eq!(json, "\"api_key:read\"");
        let parsed: Permission = serde_json::from_str("\"vm:restart\"").unwrap();
        assert_eq!(parsed, Permission::VmRestart);
    }
}
