use super::{IamService, NewTenant, Result, ServiceError};
use crate::auth::hash_password;
use crate::config::BootstrapConfig;
use crate::model::User;
use crate::permissions::ROLE_ADMIN;
use secrecy::ExposeSecret;
use serde::Serialize;

/// What a seed run changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub tenant_created: Option<String>,
    pub superuser_created: Option<String>,
}

impl IamService {
    /// Seed the catalog, built-in roles, default tenant and superuser.
    /// Safe to run repeatedly; existing records are left alone
    pub async fn bootstrap(&self, config: &BootstrapConfig) -> Result<BootstrapReport> {
        let mut report = BootstrapReport {
            permissions_created: self.seed_catalog().await?,
            ..Default::default()
        };
        report.roles_created = self.seed_system_roles().await?;

        let tenant = match &config.default_tenant {
            Some(name) => match self.storage.get_tenant_by_name(name).await? {
                Some(tenant) => Some(tenant),
                None => {
                    let tenant = self
                        .create_tenant(NewTenant {
                            name: name.clone(),
                            ..Default::default()
                        })
                        .await?;
                    report.tenant_created = Some(tenant.slug.clone());
                    Some(tenant)
                }
            },
            None => None,
        };

        let superuser = match &config.superuser_email {
            Some(email) => match self.storage.get_user_by_email(email).await? {
                Some(user) => Some(user),
                None => {
                    let hash = match (&config.superuser_password, &config.superuser_password_hash) {
                        (Some(password), _) => {
                            hash_password(password.expose_secret(), self.bcrypt_cost)?
                        }
                        (None, Some(hash)) => hash.clone(),
                        (None, None) => {
                            return Err(ServiceError::Validation(format!(
                                "no password configured for superuser {}",
                                email
                            )))
                        }
                    };
                    let user = User::new(email.trim().to_lowercase(), hash).superuser();
                    self.storage.create_user(&user).await?;
                    tracing::info!(user_id = %user.id, "Created superuser");
                    report.superuser_created = Some(user.email.clone());
                    Some(user)
                }
            },
            None => None,
        };

        if let (Some(tenant), Some(user)) = (&tenant, &superuser) {
            if let Some(admin) = self.storage.get_role_by_name(ROLE_ADMIN).await? {
                self.assign_role(&user.id, &tenant.id, &admin.id).await?;
            }
        }

        Ok(report)
    }
}
