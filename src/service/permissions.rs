use super::{not_found, IamService, Result};
use crate::model::{new_id, Page, PermissionRecord, Role};
use crate::permissions::{system_roles, Permission};

impl IamService {
    pub async fn list_permissions(&self, page: Page) -> Result<Vec<PermissionRecord>> {
        Ok(page.apply(self.storage.list_permissions().await?))
    }

    pub async fn get_permission(&self, id: &str) -> Result<PermissionRecord> {
        self.storage
            .get_permission(id)
            .await?
            .ok_or_else(|| not_found("permission", id))
    }

    /// Insert a catalog row for every permission that lacks one.
    /// Returns how many were created
    pub async fn seed_catalog(&self) -> Result<usize> {
        let mut created = 0;
        for permission in Permission::ALL {
            if self
                .storage
                .get_permission_by_code(permission.code())
                .await?
                .is_some()
            {
                continue;
            }
            self.storage
                .create_permission(&PermissionRecord {
                    id: new_id(),
                    code: permission.code().to_string(),
                    name: permission.label(),
                    description: None,
                })
                .await?;
            created += 1;
        }
        if created > 0 {
            tracing::info!(created, "Seeded permission catalog");
        }
        Ok(created)
    }

    /// Create the built-in roles and grant their permission sets.
    /// Seeds the catalog first. Returns how many roles were created
    pub async fn seed_system_roles(&self) -> Result<usize> {
        self.seed_catalog().await?;

        let mut created = 0;
        for definition in system_roles() {
            let role = match self.storage.get_role_by_name(definition.name).await? {
                Some(role) => role,
                None => {
                    let role = Role::new(definition.name)
                        .with_description(definition.description)
                        .system();
                    self.storage.create_role(&role).await?;
                    created += 1;
                    role
                }
            };

            let mut permissions: Vec<Permission> = definition.permissions.into_iter().collect();
            permissions.sort_by_key(|p| p.code());
            for permission in permissions {
                let record = self.permission_record(permission).await?;
                self.storage.add_role_permission(&role.id, &record.id).await?;
            }
        }
        if created > 0 {
            tracing::info!(created, "Seeded system roles");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use crate::model::Page;
    use crate::permissions::{system_role, Permission, ROLE_ADMIN, ROLE_TENANT_ADMIN};

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let service = testing::service().await;
        assert_eq!(service.seed_catalog().await.unwrap(), 0);
        assert_eq!(service.seed_system_roles().await.unwrap(), 0);

        let catalog = service.list_permissions(Page::default()).await.unwrap();
        assert_eq!(catalog.len(), Permission::ALL.len());
        let record = service.get_permission(&catalog[0].id).await.unwrap();
        assert_eq!(record.code, catalog[0].code);
    }

    #[tokio::test]
    async fn test_system_role_sets() {
        let service = testing::service().await;
        for name in [ROLE_ADMIN, ROLE_TENANT_ADMIN] {
            let role = service
                .storage()
                .get_role_by_name(name)
                .await
                .unwrap()
                .unwrap();
            assert!(role.is_system);
            let detail = service.get_role(&role.id).await.unwrap();
            let expected = system_role(name).unwrap().permissions.len();
            assert_eq!(detail.permissions.len(), expected);
        }
    }
}
