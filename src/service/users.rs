use super::{not_found, optional, required, IamService, Result, ServiceError};
use crate::auth::hash_password;
use crate::authz::Principal;
use crate::model::{Page, User, UserView};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

/// A tenant member with the names of the roles it holds there
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    #[serde(flatten)]
    pub user: UserView,
    pub roles: Vec<String>,
}

fn clean_email(raw: &str) -> Result<String> {
    let email = required("email", raw)?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ServiceError::Validation(format!(
            "'{}' is not a valid email address",
            raw.trim()
        ))),
    }
}

impl IamService {
    pub async fn create_user(&self, input: NewUser) -> Result<User> {
        let email = clean_email(&input.email)?;
        if self.storage.get_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(format!("email '{}' is registered", email)));
        }

        let mut user = User::new(email, hash_password(&input.password, self.bcrypt_cost)?);
        user.full_name = optional(input.full_name);
        user.is_superuser = input.is_superuser;
        self.storage.create_user(&user).await?;

        tracing::info!(user_id = %user.id, superuser = user.is_superuser, "Created user");
        Ok(user)
    }

    /// Create a user and make it a member of a tenant with one role
    pub async fn create_member(
        &self,
        actor: &Principal,
        tenant_id: &str,
        input: NewUser,
        role_id: Option<&str>,
    ) -> Result<MemberView> {
        if input.is_superuser && !actor.has_global_access() {
            return Err(ServiceError::Forbidden(
                "only superusers may create superusers".to_string(),
            ));
        }
        self.get_tenant(tenant_id).await?;
        let role = match role_id {
            Some(id) => self.find_role(id).await?,
            None => self.default_role().await?.ok_or_else(|| {
                ServiceError::Validation("no role given and no default role exists".to_string())
            })?,
        };

        let user = self.create_user(input).await?;
        self.assign_role(&user.id, tenant_id, &role.id).await?;
        Ok(MemberView {
            user: UserView::from(&user),
            roles: vec![role.name],
        })
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.storage
            .get_user(id)
            .await?
            .ok_or_else(|| not_found("user", id))
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.storage
            .get_user_by_email(email.trim())
            .await?
            .ok_or_else(|| not_found("user", email))
    }

    /// Fetch a user that must be a member of the tenant
    pub async fn get_member(&self, tenant_id: &str, user_id: &str) -> Result<MemberView> {
        let user = self.get_user(user_id).await?;
        let roles = self.storage.list_user_roles(user_id, tenant_id).await?;
        if roles.is_empty() {
            return Err(not_found("user", user_id));
        }
        Ok(MemberView {
            user: UserView::from(&user),
            roles: roles.into_iter().map(|r| r.name).collect(),
        })
    }

    /// Members of a tenant ordered by email, optionally filtered by a
    /// case-insensitive search over email and full name
    pub async fn list_members(
        &self,
        tenant_id: &str,
        search: Option<&str>,
        page: Page,
    ) -> Result<Vec<MemberView>> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut user_ids: Vec<String> = self
            .storage
            .list_tenant_assignments(tenant_id)
            .await?
            .into_iter()
            .map(|a| a.user_id)
            .collect();
        user_ids.sort();
        user_ids.dedup();

        let mut members = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let Some(user) = self.storage.get_user(&user_id).await? else {
                continue;
            };
            if let Some(needle) = &needle {
                let matches = user.email.to_lowercase().contains(needle.as_str())
                    || user
                        .full_name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(needle.as_str()));
                if !matches {
                    continue;
                }
            }
            let roles = self.storage.list_user_roles(&user.id, tenant_id).await?;
            members.push(MemberView {
                user: UserView::from(&user),
                roles: roles.into_iter().map(|r| r.name).collect(),
            });
        }
        members.sort_by(|a, b| a.user.email.cmp(&b.user.email));

        Ok(page.apply(members))
    }

    /// Apply an update. Only a superuser acting globally may change the
    /// superuser flag
    pub async fn update_user(
        &self,
        actor: &Principal,
        id: &str,
        update: UserUpdate,
    ) -> Result<User> {
        let mut user = self.get_user(id).await?;

        if !actor.has_global_access() {
            if update.is_superuser.is_some() {
                return Err(ServiceError::Forbidden(
                    "only superusers may change the superuser flag".to_string(),
                ));
            }
            if user.is_superuser && user.id != actor.user_id() {
                return Err(ServiceError::Forbidden(
                    "only superusers may modify a superuser".to_string(),
                ));
            }
            // Credentials of other members are theirs alone
            if user.id != actor.user_id() && (update.email.is_some() || update.password.is_some()) {
                return Err(ServiceError::Forbidden(
                    "only the account owner may change its email or password".to_string(),
                ));
            }
        }

        if let Some(email) = update.email {
            let email = clean_email(&email)?;
            if let Some(other) = self.storage.get_user_by_email(&email).await? {
                if other.id != user.id {
                    return Err(ServiceError::Conflict(format!(
                        "email '{}' is registered",
                        email
                    )));
                }
            }
            user.email = email;
        }
        if update.full_name.is_some() {
            user.full_name = optional(update.full_name);
        }
        if let Some(password) = update.password {
            user.password_hash = hash_password(&password, self.bcrypt_cost)?;
        }
        if let Some(active) = update.is_active {
            user.is_active = active;
        }
        if let Some(superuser) = update.is_superuser {
            user.is_superuser = superuser;
        }

        user.updated_at = Utc::now();
        self.storage.update_user(&user).await?;
        tracing::info!(user_id = %user.id, actor = %actor.user_id(), "Updated user");
        Ok(user)
    }

    /// Drop every role the user holds in the tenant
    pub async fn remove_from_tenant(&self, user_id: &str, tenant_id: &str) -> Result<usize> {
        let removed = self.storage.remove_user_from_tenant(user_id, tenant_id).await?;
        if removed == 0 {
            return Err(not_found("user", user_id));
        }
        tracing::info!(user_id = %user_id, tenant_id = %tenant_id, "Removed user from tenant");
        Ok(removed)
    }

    /// Delete the user everywhere, with its assignments and keys
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.get_user(id).await?;
        self.storage.delete_user(id).await?;
        tracing::info!(user_id = %id, "Deleted user");
        Ok(())
    }
}
