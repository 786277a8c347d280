use super::{not_found, optional, required, IamService, Result, ServiceError};
use crate::auth::{generate_api_key, hash_token};
use crate::authz::Principal;
use crate::model::{new_id, ApiKey, ApiKeyScope, ApiKeyView, Page};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Longest lifetime a new key may be given
pub const MAX_EXPIRY_DAYS: i64 = 3650;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: ApiKeyScope,
    /// Required for tenant scope, forbidden for global scope
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Days until the key expires; None = never
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly created key. `key` is the only time the secret is revealed
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    pub key: String,
    #[serde(flatten)]
    pub api_key: ApiKeyView,
}

impl IamService {
    /// Create a key owned by the acting user
    pub async fn create_api_key(&self, actor: &Principal, input: NewApiKey) -> Result<CreatedApiKey> {
        let name = required("name", &input.name)?;

        let tenant_id = match (input.scope, optional(input.tenant_id)) {
            (ApiKeyScope::Global, Some(_)) => {
                return Err(ServiceError::Validation(
                    "global API keys cannot name a tenant".to_string(),
                ))
            }
            (ApiKeyScope::Global, None) => None,
            (ApiKeyScope::Tenant, None) => {
                return Err(ServiceError::Validation(
                    "tenant API keys require tenant_id".to_string(),
                ))
            }
            (ApiKeyScope::Tenant, Some(tenant_id)) => Some(tenant_id),
        };

        // A pinned key can only mint keys pinned to the same tenant
        if let Some(pinned) = actor.pinned_tenant() {
            if tenant_id.as_deref() != Some(pinned) {
                return Err(ServiceError::Forbidden(
                    "a tenant API key can only create keys for its own tenant".to_string(),
                ));
            }
        }

        if let Some(tenant_id) = &tenant_id {
            self.get_tenant(tenant_id).await?;
            if !actor.is_superuser() && !self.authz.is_member(actor.user_id(), tenant_id).await? {
                return Err(ServiceError::Forbidden(
                    "not a member of the tenant".to_string(),
                ));
            }
        }

        let expires_at = match input.expires_in_days {
            Some(days) if !(1..=MAX_EXPIRY_DAYS).contains(&days) => {
                return Err(ServiceError::Validation(format!(
                    "expires_in_days must be between 1 and {}",
                    MAX_EXPIRY_DAYS
                )))
            }
            Some(days) => Some(Utc::now() + Duration::days(days)),
            None => None,
        };

        let (raw, prefix) = generate_api_key();
        let now = Utc::now();
        let key = ApiKey {
            id: new_id(),
            name,
            description: optional(input.description),
            key_prefix: prefix,
            key_hash: hash_token(&raw),
            user_id: actor.user_id().to_string(),
            tenant_id,
            scope: input.scope,
            is_active: true,
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_api_key(&key).await?;

        tracing::info!(
            key_id = %key.id,
            user_id = %key.user_id,
            scope = %key.scope,
            "Created API key"
        );
        Ok(CreatedApiKey {
            key: raw,
            api_key: ApiKeyView::from(&key),
        })
    }

    /// Keys visible to the actor. Superusers see every key, optionally of one
    /// tenant; everyone else sees their own
    pub async fn list_api_keys(
        &self,
        actor: &Principal,
        tenant_id: Option<&str>,
        page: Page,
    ) -> Result<Vec<ApiKeyView>> {
        let tenant_id = tenant_id.or(actor.pinned_tenant());
        let mut keys: Vec<ApiKey> = self
            .storage
            .list_api_keys()
            .await?
            .into_iter()
            .filter(|k| actor.has_global_access() || k.user_id == actor.user_id())
            .filter(|k| tenant_id.map_or(true, |t| k.tenant_id.as_deref() == Some(t)))
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.apply(keys).iter().map(ApiKeyView::from).collect())
    }

    /// Fetch a key the actor may manage. Keys of others read as missing
    async fn owned_api_key(&self, actor: &Principal, id: &str) -> Result<ApiKey> {
        let key = self
            .storage
            .get_api_key(id)
            .await?
            .ok_or_else(|| not_found("API key", id))?;

        let visible = actor.has_global_access()
            || (key.user_id == actor.user_id()
                && actor
                    .pinned_tenant()
                    .map_or(true, |t| key.tenant_id.as_deref() == Some(t)));
        if !visible {
            return Err(not_found("API key", id));
        }
        Ok(key)
    }

    pub async fn get_api_key(&self, actor: &Principal, id: &str) -> Result<ApiKeyView> {
        Ok(ApiKeyView::from(&self.owned_api_key(actor, id).await?))
    }

    pub async fn update_api_key(
        &self,
        actor: &Principal,
        id: &str,
        update: ApiKeyUpdate,
    ) -> Result<ApiKeyView> {
        let mut key = self.owned_api_key(actor, id).await?;

        if let Some(name) = update.name {
            key.name = required("name", &name)?;
        }
        if update.description.is_some() {
            key.description = optional(update.description);
        }
        if let Some(active) = update.is_active {
            key.is_active = active;
        }
        if update.expires_at.is_some() {
            key.expires_at = update.expires_at;
        }

        key.updated_at = Utc::now();
        self.storage.update_api_key(&key).await?;
        tracing::info!(key_id = %key.id, "Updated API key");
        Ok(ApiKeyView::from(&key))
    }

    pub async fn delete_api_key(&self, actor: &Principal, id: &str) -> Result<()> {
        let key = self.owned_api_key(actor, id).await?;
        self.storage.delete_api_key(&key.id).await?;
        tracing::info!(key_id = %key.id, "Deleted API key");
        Ok(())
    }
}
