//! Credential validation against storage

use super::middleware::PresentedCredential;
use super::password::verify_password;
use super::sessions::SessionStore;
use super::tokens::{hash_token, DISPLAY_PREFIX_LEN};
use super::AuthError;
use crate::authz::Principal;
use crate::config::AuthConfig;
use crate::model::{ApiKey, User, UserView};
use crate::storage::StorageBackend;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Result of a successful password login
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub user: UserView,
}

/// Turns passwords, session tokens and API keys into principals
pub struct Authenticator {
    storage: Arc<dyn StorageBackend>,
    sessions: SessionStore,
}

impl Authenticator {
    pub fn new(storage: Arc<dyn StorageBackend>, config: &AuthConfig) -> Self {
        Self {
            storage,
            sessions: SessionStore::new(config.access_token_ttl),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Check an email and password and start a session
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let mut user = match self.storage.get_user_by_email(email.trim()).await? {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => {
                tracing::warn!(email = %email, "Failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login refused for inactive user");
            return Err(AuthError::InactiveUser);
        }

        let now = Utc::now();
        user.last_login = Some(now);
        user.updated_at = now;
        self.storage.update_user(&user).await?;

        let (access_token, session) = self.sessions.issue(&user.id);
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(LoginOutcome {
            access_token,
            token_type: "bearer",
            expires_in: (session.expires_at - now).num_seconds(),
            expires_at: session.expires_at,
            user: UserView::from(&user),
        })
    }

    /// End a session. Returns false if the token was not live
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.revoke(token)
    }

    /// End every session of a user, e.g. after a password change
    pub fn logout_user(&self, user_id: &str) -> usize {
        self.sessions.revoke_user(user_id)
    }

    /// Resolve a presented credential into a principal
    pub async fn authenticate(
        &self,
        credential: &PresentedCredential,
    ) -> Result<Principal, AuthError> {
        match credential {
            PresentedCredential::SessionToken(token) => {
                let session = self.sessions.resolve(token, Utc::now())?;
                let user = self.active_user(&session.user_id).await?;
                Ok(Principal::session(user))
            }
            PresentedCredential::ApiKey(raw) => {
                let (key, user) = self.validate_api_key(raw).await?;
                Ok(Principal::api_key(user, &key))
            }
        }
    }

    /// Validate a raw API key, returning the key and its owner
    pub async fn validate_api_key(&self, raw: &str) -> Result<(ApiKey, User), AuthError> {
        if raw.len() < DISPLAY_PREFIX_LEN {
            return Err(AuthError::InvalidApiKey);
        }

        let key = self
            .storage
            .get_api_key_by_hash(&hash_token(raw))
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        if !key.is_active {
            return Err(AuthError::InvalidApiKey);
        }

        let now = Utc::now();
        if key.is_expired(now) {
            tracing::debug!(key_id = %key.id, "Rejected expired API key");
            return Err(AuthError::ApiKeyExpired);
        }

        let user = match self.active_user(&key.user_id).await {
            Ok(user) => user,
            Err(AuthError::InvalidToken) => return Err(AuthError::InvalidApiKey),
            Err(e) => return Err(e),
        };

        self.storage.touch_api_key(&key.id, now).await?;
        Ok((key, user))
    }

    async fn active_user(&self, user_id: &str) -> Result<User, AuthError> {
        let user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::InactiveUser);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_api_key, hash_password};
    use crate::authz::Credential;
    use crate::model::{ApiKeyScope, Tenant};
    use crate::storage::FileStorage;
    use chrono::Duration;

    async fn setup() -> (Arc<dyn StorageBackend>, Authenticator, User) {
        let storage: Arc<dyn StorageBackend> = Arc::new(FileStorage::in_memory());
        let user = User::new("alice@example.com", hash_password("correct horse", 4).unwrap());
        storage.create_user(&user).await.unwrap();
        let auth = Authenticator::new(storage.clone(), &AuthConfig::default());
        (storage, auth, user)
    }

    async fn stored_key(
        storage: &Arc<dyn StorageBackend>,
        user: &User,
        tenant: Option<&str>,
    ) -> (String, ApiKey) {
        let (raw, _) = generate_api_key();
        let key = crate::storage::conformance::api_key(&user.id, tenant, &hash_token(&raw));
        storage.create_api_key(&key).await.unwrap();
        (raw, key)
    }

    #[tokio::test]
    async fn test_login_and_session() {
        let (storage, auth, user) = setup().await;

        let outcome = auth.login("Alice@Example.com", "correct horse").await.unwrap();
        assert_eq!(outcome.token_type, "bearer");
        assert_eq!(outcome.user.id, user.id);
        assert!(outcome.expires_in > 29 * 60);

        let reloaded = storage.get_user(&user.id).await.unwrap().unwrap();
        assert!(reloaded.last_login.is_some());

        let token = PresentedCredential::SessionToken(outcome.access_token.clone());
        let principal = auth.authenticate(&token).await.unwrap();
        assert_eq!(principal.user_id(), user.id);
        assert_eq!(principal.credential, Credential::Session);

        assert!(auth.logout(&outcome.access_token));
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (storage, auth, user) = setup().await;

        assert!(matches!(
            auth.login("alice@example.com", "wrong password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody@example.com", "correct horse").await,
            Err(AuthError::InvalidCredentials)
        ));

        let mut inactive = user.clone();
        inactive.is_active = false;
        storage.update_user(&inactive).await.unwrap();
        assert!(matches!(
            auth.login("alice@example.com", "correct horse").await,
            Err(AuthError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn test_session_of_deactivated_user() {
        let (storage, auth, user) = setup().await;
        let outcome = auth.login("alice@example.com", "correct horse").await.unwrap();

        let mut inactive = user.clone();
        inactive.is_active = false;
        storage.update_user(&inactive).await.unwrap();

        let token = PresentedCredential::SessionToken(outcome.access_token);
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn test_api_key_validation() {
        let (storage, auth, user) = setup().await;
        let tenant = Tenant::new("Acme", None);
        storage.create_tenant(&tenant).await.unwrap();
        let (raw, key) = stored_key(&storage, &user, Some(&tenant.id)).await;

        let principal = auth
            .authenticate(&PresentedCredential::ApiKey(raw.clone()))
            .await
            .unwrap();
        assert_eq!(principal.pinned_tenant(), Some(tenant.id.as_str()));
        assert!(matches!(
            principal.credential,
            Credential::ApiKey {
                scope: ApiKeyScope::Tenant,
                ..
            }
        ));

        let touched = storage.get_api_key(&key.id).await.unwrap().unwrap();
        assert!(touched.last_used_at.is_some());

        assert!(matches!(
            auth.validate_api_key("tk_").await,
            Err(AuthError::InvalidApiKey)
        ));
        assert!(matches!(
            auth.validate_api_key("tk_0000000000000000").await,
            Err(AuthError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn test_api_key_rejections() {
        let (storage, auth, user) = setup().await;

        let (raw, mut key) = stored_key(&storage, &user, None).await;
        key.expires_at = Some(Utc::now() - Duration::minutes(1));
        storage.update_api_key(&key).await.unwrap();
        assert!(matches!(
            auth.validate_api_key(&raw).await,
            Err(AuthError::ApiKeyExpired)
        ));

        let (raw, mut key) = stored_key(&storage, &user, None).await;
        key.is_active = false;
        storage.update_api_key(&key).await.unwrap();
        assert!(matches!(
            auth.validate_api_key(&raw).await,
            Err(AuthError::InvalidApiKey)
        ));

        let (raw, _) = stored_key(&storage, &user, None).await;
        let mut inactive = user.clone();
        inactive.is_active = false;
        storage.update_user(&inactive).await.unwrap();
        assert!(matches!(
            auth.validate_api_key(&raw).await,
            Err(AuthError::InactiveUser)
        ));
    }
}
