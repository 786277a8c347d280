use super::{not_found, optional, required, IamService, Result, ServiceError};
use crate::authz::Principal;
use crate::model::{slugify, Page, Tenant};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTenant {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Normalise a caller-supplied slug, rejecting one that slugifies to nothing
fn clean_slug(raw: &str) -> Result<String> {
    let slug = slugify(raw);
    if slug.is_empty() {
        return Err(ServiceError::Validation(format!(
            "slug '{}' has no usable characters",
            raw
        )));
    }
    Ok(slug)
}

impl IamService {
    pub async fn create_tenant(&self, input: NewTenant) -> Result<Tenant> {
        let name = required("name", &input.name)?;
        let slug = match optional(input.slug) {
            Some(slug) => clean_slug(&slug)?,
            None => clean_slug(&name)?,
        };

        if self.storage.get_tenant_by_slug(&slug).await?.is_some() {
            return Err(ServiceError::Conflict(format!("tenant slug '{}' is taken", slug)));
        }
        if self.storage.get_tenant_by_name(&name).await?.is_some() {
            return Err(ServiceError::Conflict(format!("tenant name '{}' is taken", name)));
        }

        let mut tenant = Tenant::new(name, Some(slug));
        tenant.description = optional(input.description);
        self.storage.create_tenant(&tenant).await?;

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Created tenant");
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: &str) -> Result<Tenant> {
        self.storage
            .get_tenant(id)
            .await?
            .ok_or_else(|| not_found("tenant", id))
    }

    pub async fn get_tenant_by_slug(&self, slug: &str) -> Result<Tenant> {
        self.storage
            .get_tenant_by_slug(slug)
            .await?
            .ok_or_else(|| not_found("tenant", slug))
    }

    /// Tenants visible to the principal: all of them for a superuser, otherwise
    /// those it holds a role in. A tenant-pinned key only sees its tenant
    pub async fn list_tenants(&self, actor: &Principal, page: Page) -> Result<Vec<Tenant>> {
        let mut tenants = self.storage.list_tenants().await?;

        if !actor.has_global_access() {
            let member_of: HashSet<String> = self
                .storage
                .list_user_assignments(actor.user_id())
                .await?
                .into_iter()
                .map(|a| a.tenant_id)
                .collect();
            tenants.retain(|t| {
                (actor.is_superuser() || member_of.contains(&t.id))
                    && actor.pinned_tenant().map_or(true, |pinned| pinned == t.id)
            });
        }

        Ok(page.apply(tenants))
    }

    /// Update a tenant. A new name re-derives the slug unless a slug is given
    pub async fn update_tenant(&self, id: &str, update: TenantUpdate) -> Result<Tenant> {
        let mut tenant = self.get_tenant(id).await?;

        if let Some(name) = update.name {
            let name = required("name", &name)?;
            if name != tenant.name {
                if let Some(other) = self.storage.get_tenant_by_name(&name).await? {
                    if other.id != tenant.id {
                        return Err(ServiceError::Conflict(format!(
                            "tenant name '{}' is taken",
                            name
                        )));
                    }
                }
                if update.slug.is_none() {
                    tenant.slug = clean_slug(&name)?;
                }
                tenant.name = name;
            }
        }

        if let Some(slug) = update.slug {
            tenant.slug = clean_slug(&slug)?;
        }
        if let Some(other) = self.storage.get_tenant_by_slug(&tenant.slug).await? {
            if other.id != tenant.id {
                return Err(ServiceError::Conflict(format!(
                    "tenant slug '{}' is taken",
                    tenant.slug
                )));
            }
        }

        if update.description.is_some() {
            tenant.description = optional(update.description);
        }
        if let Some(active) = update.is_active {
            tenant.is_active = active;
        }

        tenant.updated_at = Utc::now();
        self.storage.update_tenant(&tenant).await?;
        tracing::info!(tenant_id = %tenant.id, "Updated tenant");
        Ok(tenant)
    }

    /// Delete a tenant with its assignments, tenant keys and invitations
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        self.get_tenant(id).await?;
        self.storage.delete_tenant(id).await?;
        tracing::info!(tenant_id = %id, "Deleted tenant");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::permissions::ROLE_VIEWER;

    #[tokio::test]
    async fn test_create_derives_slug() {
        let service = testing::service().await;
        let tenant = testing::tenant(&service, "Acme  Rockets_Inc").await;
        assert_eq!(tenant.slug, "acme-rockets-inc");

        let err = service
            .create_tenant(NewTenant {
                name: "Other".to_string(),
                slug: Some("Acme Rockets Inc".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        assert!(matches!(
            service
                .create_tenant(NewTenant {
                    name: "  ".to_string(),
                    ..Default::default()
                })
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service
                .create_tenant(NewTenant {
                    name: "Acme  Rockets_Inc".to_string(),
                    slug: Some("unique".to_string()),
                    ..Default::default()
                })
                .await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_reslugs_only_without_slug() {
        let service = testing::service().await;
        let tenant = testing::tenant(&service, "Acme").await;

        let renamed = service
            .update_tenant(
                &tenant.id,
                TenantUpdate {
                    name: Some("Acme Labs".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.slug, "acme-labs");

        let pinned = service
            .update_tenant(
                &tenant.id,
                TenantUpdate {
                    name: Some("Acme Research".to_string()),
                    slug: Some("acme".to_string()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(pinned.slug, "acme");
        assert_eq!(pinned.name, "Acme Research");
        assert!(!pinned.is_active);
    }

    #[tokio::test]
    async fn test_list_filters_by_membership() {
        let service = testing::service().await;
        let acme = testing::tenant(&service, "Acme").await;
        testing::tenant(&service, "Globex").await;
        let user = testing::user(&service, "bob@example.com").await;
        testing::grant(&service, &user, &acme, ROLE_VIEWER).await;

        let visible = service
            .list_tenants(&Principal::session(user), Page::default())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, acme.id);

        let root = testing::superuser(&service).await;
        assert_eq!(service.list_tenants(&root, Page::default()).await.unwrap().len(), 2);
        assert_eq!(service.list_tenants(&root, Page::new(1, 10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let service = testing::service().await;
        let tenant = testing::tenant(&service, "Acme").await;
        service.delete_tenant(&tenant.id).await.unwrap();
        assert!(matches!(
            service.get_tenant(&tenant.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_tenant(&tenant.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
