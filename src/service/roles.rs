use super::{not_found, optional, required, IamService, Result, ServiceError};
use crate::model::{Page, PermissionRecord, Role, RoleAssignment, User};
use crate::permissions::Permission;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Permission codes to grant straight away
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A role with the codes it grants
#[derive(Debug, Clone, Serialize)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<String>,
}

fn ensure_mutable(role: &Role) -> Result<()> {
    if role.is_system {
        return Err(ServiceError::Forbidden(format!(
            "system role '{}' cannot be changed",
            role.name
        )));
    }
    Ok(())
}

impl IamService {
    pub(super) async fn find_role(&self, id: &str) -> Result<Role> {
        self.storage
            .get_role(id)
            .await?
            .ok_or_else(|| not_found("role", id))
    }

    /// The role invitations and new members fall back to
    pub(super) async fn default_role(&self) -> Result<Option<Role>> {
        Ok(self
            .storage
            .get_role_by_name(&self.invitations.default_role)
            .await?)
    }

    pub async fn create_role(&self, input: NewRole) -> Result<RoleDetail> {
        let name = required("name", &input.name)?;
        if self.storage.get_role_by_name(&name).await?.is_some() {
            return Err(ServiceError::Conflict(format!("role '{}' exists", name)));
        }

        let mut records = Vec::with_capacity(input.permissions.len());
        for code in &input.permissions {
            let permission: Permission = code.parse().map_err(ServiceError::Validation)?;
            let record = self
                .storage
                .get_permission_by_code(permission.code())
                .await?
                .ok_or_else(|| not_found("permission", permission.code()))?;
            records.push(record);
        }

        let mut role = Role::new(name);
        role.description = optional(input.description);
        self.storage.create_role(&role).await?;
        for record in &records {
            self.storage.add_role_permission(&role.id, &record.id).await?;
        }

        tracing::info!(role_id = %role.id, name = %role.name, "Created role");
        self.get_role(&role.id).await
    }

    pub async fn get_role(&self, id: &str) -> Result<RoleDetail> {
        let role = self.find_role(id).await?;
        let permissions = self
            .storage
            .list_role_permissions(&role.id)
            .await?
            .into_iter()
            .map(|p| p.code)
            .collect();
        Ok(RoleDetail { role, permissions })
    }

    pub async fn list_roles(&self, page: Page) -> Result<Vec<Role>> {
        Ok(page.apply(self.storage.list_roles().await?))
    }

    pub async fn update_role(&self, id: &str, update: RoleUpdate) -> Result<RoleDetail> {
        let mut role = self.find_role(id).await?;
        ensure_mutable(&role)?;

        if let Some(name) = update.name {
            let name = required("name", &name)?;
            if let Some(other) = self.storage.get_role_by_name(&name).await? {
                if other.id != role.id {
                    return Err(ServiceError::Conflict(format!("role '{}' exists", name)));
                }
            }
            role.name = name;
        }
        if update.description.is_some() {
            role.description = optional(update.description);
        }

        role.updated_at = Utc::now();
        self.storage.update_role(&role).await?;
        tracing::info!(role_id = %role.id, "Updated role");
        self.get_role(&role.id).await
    }

    pub async fn delete_role(&self, id: &str) -> Result<()> {
        let role = self.find_role(id).await?;
        ensure_mutable(&role)?;
        self.storage.delete_role(id).await?;
        tracing::info!(role_id = %id, name = %role.name, "Deleted role");
        Ok(())
    }

    /// Grant a catalog permission to a role. Returns false if already granted
    pub async fn grant_permission(&self, role_id: &str, permission_id: &str) -> Result<bool> {
        let role = self.find_role(role_id).await?;
        ensure_mutable(&role)?;
        let permission = self.get_permission(permission_id).await?;
        let added = self
            .storage
            .add_role_permission(&role.id, &permission.id)
            .await?;
        if added {
            tracing::info!(role_id = %role.id, permission = %permission.code, "Granted permission");
        }
        Ok(added)
    }

    /// Returns false if the role did not hold the permission
    pub async fn revoke_permission(&self, role_id: &str, permission_id: &str) -> Result<bool> {
        let role = self.find_role(role_id).await?;
        ensure_mutable(&role)?;
        let permission = self.get_permission(permission_id).await?;
        let removed = self
            .storage
            .remove_role_permission(&role.id, &permission.id)
            .await?;
        if removed {
            tracing::info!(role_id = %role.id, permission = %permission.code, "Revoked permission");
        }
        Ok(removed)
    }

    /// Give a user a role in a tenant. Returns false if it already held it
    pub async fn assign_role(&self, user_id: &str, tenant_id: &str, role_id: &str) -> Result<bool> {
        self.get_user(user_id).await?;
        self.get_tenant(tenant_id).await?;
        self.find_role(role_id).await?;

        let added = self
            .storage
            .add_role_assignment(&RoleAssignment::new(user_id, tenant_id, role_id))
            .await?;
        if added {
            tracing::info!(user_id = %user_id, tenant_id = %tenant_id, role_id = %role_id, "Assigned role");
        }
        Ok(added)
    }

    /// Returns false if the user did not hold the role there
    pub async fn unassign_role(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<bool> {
        let removed = self
            .storage
            .remove_role_assignment(user_id, tenant_id, role_id)
            .await?;
        if removed {
            tracing::info!(user_id = %user_id, tenant_id = %tenant_id, role_id = %role_id, "Unassigned role");
        }
        Ok(removed)
    }

    pub async fn user_roles(&self, user_id: &str, tenant_id: &str) -> Result<Vec<Role>> {
        self.get_user(user_id).await?;
        Ok(self.storage.list_user_roles(user_id, tenant_id).await?)
    }

    /// Codes the user may exercise in the tenant, sorted
    pub async fn user_permissions(&self, user: &User, tenant_id: &str) -> Result<Vec<String>> {
        let mut codes: Vec<String> = self
            .authz
            .effective_permissions(user, tenant_id)
            .await?
            .into_iter()
            .map(|p| p.code().to_string())
            .collect();
        codes.sort();
        Ok(codes)
    }

    pub(super) async fn permission_record(&self, permission: Permission) -> Result<PermissionRecord> {
        self.storage
            .get_permission_by_code(permission.code())
            .await?
            .ok_or_else(|| not_found("permission", permission.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::permissions::{ROLE_ADMIN, ROLE_VIEWER};

    #[tokio::test]
    async fn test_custom_role_lifecycle() {
        let service = testing::service().await;
        let role = service
            .create_role(NewRole {
                name: "operator".to_string(),
                description: Some("Runs VMs".to_string()),
                permissions: vec!["vm:start".to_string(), "VM:STOP".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(role.permissions, vec!["vm:start", "vm:stop"]);

        let vm_read = service.permission_record(Permission::VmRead).await.unwrap();
        assert!(service.grant_permission(&role.role.id, &vm_read.id).await.unwrap());
        assert!(!service.grant_permission(&role.role.id, &vm_read.id).await.unwrap());
        assert!(service.revoke_permission(&role.role.id, &vm_read.id).await.unwrap());
        assert!(!service.revoke_permission(&role.role.id, &vm_read.id).await.unwrap());

        let renamed = service
            .update_role(
                &role.role.id,
                RoleUpdate {
                    name: Some("vm-operator".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.role.name, "vm-operator");

        service.delete_role(&role.role.id).await.unwrap();
        assert!(matches!(
            service.get_role(&role.role.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_role_validation() {
        let service = testing::service().await;
        assert!(matches!(
            service
                .create_role(NewRole {
                    name: ROLE_ADMIN.to_string(),
                    ..Default::default()
                })
                .await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            service
                .create_role(NewRole {
                    name: "broken".to_string(),
                    permissions: vec!["vm:explode".to_string()],
                    ..Default::default()
                })
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert!(service.storage.get_role_by_name("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_system_roles_immutable() {
        let service = testing::service().await;
        let viewer = service
            .storage
            .get_role_by_name(ROLE_VIEWER)
            .await
            .unwrap()
            .unwrap();
        let vm_start = service.permission_record(Permission::VmStart).await.unwrap();

        assert!(matches!(
            service
                .update_role(
                    &viewer.id,
                    RoleUpdate {
                        name: Some("watcher".to_string()),
                        ..Default::default()
                    }
                )
                .await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.delete_role(&viewer.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.grant_permission(&viewer.id, &vm_start.id).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_assignments() {
        let service = testing::service().await;
        let acme = testing::tenant(&service, "Acme").await;
        let user = testing::user(&service, "erin@example.com").await;
        let viewer = service
            .storage
            .get_role_by_name(ROLE_VIEWER)
            .await
            .unwrap()
            .unwrap();

        assert!(service.assign_role(&user.id, &acme.id, &viewer.id).await.unwrap());
        assert!(!service.assign_role(&user.id, &acme.id, &viewer.id).await.unwrap());

        let roles = service.user_roles(&user.id, &acme.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        let codes = service.user_permissions(&user, &acme.id).await.unwrap();
        assert_eq!(codes, vec!["api_key:read", "tenant:read", "user:read", "vm:read"]);

        assert!(matches!(
            service.assign_role(&user.id, &acme.id, "missing").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.assign_role("missing", &acme.id, &viewer.id).await,
            Err(ServiceError::NotFound(_))
        ));

        assert!(service.unassign_role(&user.id, &acme.id, &viewer.id).await.unwrap());
        assert!(!service.unassign_role(&user.id, &acme.id, &viewer.id).await.unwrap());
    }
}
