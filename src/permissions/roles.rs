use super::Permission;
use std::collections::HashSet;

/// Predefined role names
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_TENANT_ADMIN: &str = "tenant_admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_VIEWER: &str = "viewer";

/// A built-in role definition
#[derive(Debug, Clone)]
pub struct SystemRole {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: HashSet<Permission>,
}

impl SystemRole {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

fn set(permissions: &[Permission]) -> HashSet<Permission> {
    permissions.iter().copied().collect()
}

/// Every permission
fn admin_role() -> SystemRole {
    SystemRole {
        name: ROLE_ADMIN,
        description: "Full administrative access",
        permissions: Permission::all(),
    }
}

fn tenant_admin_role() -> SystemRole {
    use Permission::*;
    SystemRole {
        name: ROLE_TENANT_ADMIN,
        description: "Administers users, keys, roles and resources of a tenant",
        permissions: set(&[
            UserRead,
            UserCreate,
            UserUpdate,
            UserDelete,
            TenantRead,
            TenantUpdate,
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
            RoleAssign,
            PermissionRead,
            PermissionAssign,
        ]),
    }
}

fn user_role() -> SystemRole {
    use Permission::*;
    SystemRole {
        name: ROLE_USER,
        description: "Regular tenant member",
        permissions: set(&[
            UserRead,
            UserUpdate,
            TenantRead,
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
        ]),
    }
}

fn viewer_role() -> SystemRole {
    use Permission::*;
    SystemRole {
        name: ROLE_VIEWER,
        description: "Read-only access",
        permissions: set(&[UserRead, TenantRead, ApiKeyRead, VmRead]),
    }
}

/// All built-in roles
pub fn system_roles() -> Vec<SystemRole> {
    vec![admin_role(), tenant_admin_role(), user_role(), viewer_role()]
}

/// Look up a built-in role by name
pub fn system_role(name: &str) -> Option<SystemRole> {
    system_roles().into_iter().find(|r| r.name == name)
}
