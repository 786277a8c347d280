//! Invitation lifecycle
//!
//! An invitation moves out of `Pending` exactly once: to `Accepted` when the
//! invitee accepts, `Revoked` when an administrator withdraws it, or
//! `Expired` when it is presented after its deadline. Tokens are delivered
//! out of band and only their hashes are stored.

use super::{not_found, IamService, Result, ServiceError};
use crate::auth::{generate_invitation_token, hash_password, hash_token, validate_password};
use crate::authz::Principal;
use crate::model::{Invitation, InvitationStatus, Page, User, UserView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInvitation {
    pub email: String,
    /// Role granted on acceptance; the configured default when absent
    #[serde(default)]
    pub role_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcceptInvitation {
    pub token: String,
    /// Required when the invitee has no account yet
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// An invitation with the context a recipient or administrator needs
#[derive(Debug, Clone, Serialize)]
pub struct InvitationDetail {
    pub id: String,
    pub email: String,
    pub status: InvitationStatus,
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    pub inviter_id: String,
    pub inviter_email: Option<String>,
    pub role_id: Option<String>,
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_expired: bool,
    pub is_pending: bool,
}

/// Outcome of creating (or re-issuing) an invitation
#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvitation {
    #[serde(flatten)]
    pub invitation: InvitationDetail,
    /// Raw token, only returned here
    pub token: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedInvitation {
    pub user: UserView,
    pub invitation: InvitationDetail,
    /// False when the invitee already had an account
    pub created_user: bool,
}

impl IamService {
    /// Link the invitee follows to accept
    pub fn invitation_link(&self, token: &str) -> String {
        format!(
            "{}/accept-invitation?token={}",
            self.invitations.frontend_url, token
        )
    }

    /// Invite an email address into a tenant.
    ///
    /// A pending, unexpired invitation for the same address and tenant is
    /// re-issued with a fresh token rather than duplicated.
    pub async fn create_invitation(
        &self,
        actor: &Principal,
        tenant_id: &str,
        input: NewInvitation,
    ) -> Result<IssuedInvitation> {
        let email = input.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ServiceError::Validation(format!(
                "'{}' is not a valid email address",
                input.email.trim()
            )));
        }

        let tenant = self.get_tenant(tenant_id).await?;
        let role_id = match input.role_id.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(id) => Some(self.find_role(id).await?.id),
            None => self.default_role().await?.map(|r| r.id),
        };

        if let Some(user) = self.storage.get_user_by_email(&email).await? {
            if self.authz.is_member(&user.id, &tenant.id).await? {
                return Err(ServiceError::Conflict(format!(
                    "'{}' is already a member of {}",
                    email, tenant.name
                )));
            }
        }

        let now = Utc::now();
        let token = generate_invitation_token();
        let existing = self
            .storage
            .list_invitations(&tenant.id)
            .await?
            .into_iter()
            .find(|i| i.email == email && i.is_pending(now));

        let invitation = match existing {
            Some(mut invitation) => {
                invitation.token_hash = hash_token(&token);
                invitation.updated_at = now;
                self.storage.update_invitation(&invitation).await?;
                tracing::info!(invitation_id = %invitation.id, "Re-issued pending invitation");
                invitation
            }
            None => {
                let invitation = Invitation::new(
                    &email,
                    &tenant.id,
                    actor.user_id(),
                    role_id,
                    hash_token(&token),
                    self.invitations.expiry,
                );
                self.storage.create_invitation(&invitation).await?;
                tracing::info!(
                    invitation_id = %invitation.id,
                    tenant_id = %tenant.id,
                    inviter = %actor.user_id(),
                    "Created invitation"
                );
                invitation
            }
        };

        Ok(IssuedInvitation {
            invitation: self.invitation_detail(&invitation).await?,
            link: self.invitation_link(&token),
            token,
        })
    }

    pub async fn get_invitation(&self, id: &str) -> Result<Invitation> {
        self.storage
            .get_invitation(id)
            .await?
            .ok_or_else(|| not_found("invitation", id))
    }

    pub async fn invitation_detail(&self, invitation: &Invitation) -> Result<InvitationDetail> {
        let now = Utc::now();
        let tenant_name = self
            .storage
            .get_tenant(&invitation.tenant_id)
            .await?
            .map(|t| t.name);
        let inviter_email = self
            .storage
            .get_user(&invitation.inviter_id)
            .await?
            .map(|u| u.email);

        Ok(InvitationDetail {
            id: invitation.id.clone(),
            email: invitation.email.clone(),
            status: invitation.status,
            tenant_id: invitation.tenant_id.clone(),
            tenant_name,
            inviter_id: invitation.inviter_id.clone(),
            inviter_email,
            role_id: invitation.role_id.clone(),
            user_id: invitation.user_id.clone(),
            expires_at: invitation.expires_at,
            accepted_at: invitation.accepted_at,
            created_at: invitation.created_at,
            is_expired: invitation.is_expired(now),
            is_pending: invitation.is_pending(now),
        })
    }

    /// Invitations of a tenant, newest first
    pub async fn list_invitations(
        &self,
        tenant_id: &str,
        pending_only: bool,
        page: Page,
    ) -> Result<Vec<InvitationDetail>> {
        let now = Utc::now();
        let invitations: Vec<Invitation> = self
            .storage
            .list_invitations(tenant_id)
            .await?
            .into_iter()
            .filter(|i| !pending_only || i.is_pending(now))
            .collect();

        let mut details = Vec::new();
        for invitation in page.apply(invitations) {
            details.push(self.invitation_detail(&invitation).await?);
        }
        Ok(details)
    }

    /// Check a token without consuming it. Presenting an expired pending
    /// invitation marks it `Expired`
    pub async fn verify_invitation(&self, token: &str) -> Result<Invitation> {
        let mut invitation = self
            .storage
            .get_invitation_by_token_hash(&hash_token(token.trim()))
            .await?
            .ok_or_else(|| ServiceError::NotFound("invitation".to_string()))?;

        if invitation.status != InvitationStatus::Pending {
            return Err(ServiceError::Validation(format!(
                "invitation is {}",
                invitation.status
            )));
        }

        let now = Utc::now();
        if invitation.is_expired(now) {
            invitation.status = InvitationStatus::Expired;
            invitation.updated_at = now;
            self.storage.update_invitation(&invitation).await?;
            tracing::info!(invitation_id = %invitation.id, "Invitation expired");
            return Err(ServiceError::Validation("invitation has expired".to_string()));
        }

        Ok(invitation)
    }

    /// Accept an invitation, creating the account if the email is new.
    ///
    /// An existing account is attached as is; its password is not touched.
    pub async fn accept_invitation(&self, input: AcceptInvitation) -> Result<AcceptedInvitation> {
        let mut invitation = self.verify_invitation(&input.token).await?;
        let tenant = self.get_tenant(&invitation.tenant_id).await?;

        let role = match &invitation.role_id {
            Some(id) => self.storage.get_role(id).await?,
            None => None,
        };
        let role = match role {
            Some(role) => role,
            None => self.default_role().await?.ok_or_else(|| {
                ServiceError::Validation("invitation has no role to grant".to_string())
            })?,
        };

        let existing = self.storage.get_user_by_email(&invitation.email).await?;
        if existing.is_none() {
            let password = input.password.as_deref().ok_or_else(|| {
                ServiceError::Validation("password is required for a new account".to_string())
            })?;
            validate_password(password)?;
        }

        let created_user = existing.is_none();
        let user = match existing {
            Some(user) => user,
            None => {
                let password = input.password.as_deref().unwrap_or_default();
                let mut user =
                    User::new(invitation.email.clone(), hash_password(password, self.bcrypt_cost)?);
                user.full_name = super::optional(input.full_name);
                self.storage.create_user(&user).await?;
                tracing::info!(user_id = %user.id, "Created user from invitation");
                user
            }
        };

        self.assign_role(&user.id, &tenant.id, &role.id).await?;

        let now = Utc::now();
        invitation.status = InvitationStatus::Accepted;
        invitation.user_id = Some(user.id.clone());
        invitation.accepted_at = Some(now);
        invitation.updated_at = now;
        self.storage.update_invitation(&invitation).await?;

        tracing::info!(
            invitation_id = %invitation.id,
            user_id = %user.id,
            tenant_id = %tenant.id,
            "Invitation accepted"
        );
        Ok(AcceptedInvitation {
            user: UserView::from(&user),
            invitation: self.invitation_detail(&invitation).await?,
            created_user,
        })
    }

    /// Withdraw a pending invitation. Others come back unchanged
    pub async fn revoke_invitation(&self, id: &str) -> Result<Invitation> {
        let mut invitation = self.get_invitation(id).await?;
        if invitation.status != InvitationStatus::Pending {
            return Ok(invitation);
        }

        invitation.status = InvitationStatus::Revoked;
        invitation.updated_at = Utc::now();
        self.storage.update_invitation(&invitation).await?;
        tracing::info!(invitation_id = %invitation.id, "Revoked invitation");
        Ok(invitation)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::auth::verify_password;
    use crate::model::Tenant;
    use crate::permissions::{ROLE_TENANT_ADMIN, ROLE_USER, ROLE_VIEWER};
    use chrono::Duration;

    async fn setup() -> (IamService, Tenant, Principal) {
        let service = testing::service().await;
        let tenant = testing::tenant(&service, "Acme").await;
        let admin = testing::user(&service, "admin@acme.com").await;
        testing::grant(&service, &admin, &tenant, ROLE_TENANT_ADMIN).await;
        (service, tenant, Principal::session(admin))
    }

    fn invite(email: &str) -> NewInvitation {
        NewInvitation {
            email: email.to_string(),
            role_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_reissue() {
        let (service, tenant, admin) = setup().await;

        let first = service
            .create_invitation(&admin, &tenant.id, invite("New@Example.com"))
            .await
            .unwrap();
        assert_eq!(first.invitation.email, "new@example.com");
        assert_eq!(first.invitation.tenant_name.as_deref(), Some("Acme"));
        assert_eq!(first.invitation.inviter_email.as_deref(), Some("admin@acme.com"));
        assert!(first.invitation.is_pending);
        assert_eq!(
            first.link,
            format!("http://localhost:3000/accept-invitation?token={}", first.token)
        );

        let viewer = service.storage.get_role_by_name(ROLE_VIEWER).await.unwrap().unwrap();
        assert_eq!(first.invitation.role_id.as_deref(), Some(viewer.id.as_str()));

        let second = service
            .create_invitation(&admin, &tenant.id, invite("new@example.com"))
            .await
            .unwrap();
        assert_eq!(second.invitation.id, first.invitation.id);
        assert_ne!(second.token, first.token);

        assert!(service.verify_invitation(&first.token).await.is_err());
        assert!(service.verify_invitation(&second.token).await.is_ok());

        let stored = service.get_invitation(&first.invitation.id).await.unwrap();
        assert_eq!(stored.token_hash, hash_token(&second.token));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (service, tenant, admin) = setup().await;
        assert!(matches!(
            service
                .create_invitation(
                    &admin,
                    &tenant.id,
                    NewInvitation {
                        email: "x@example.com".to_string(),
                        role_id: Some("missing".to_string()),
                    }
                )
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.create_invitation(&admin, &tenant.id, invite("nobody")).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.create_invitation(&admin, &tenant.id, invite("admin@acme.com")).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_creates_member() {
        let (service, tenant, admin) = setup().await;
        let user_role = service.storage.get_role_by_name(ROLE_USER).await.unwrap().unwrap();
        let issued = service
            .create_invitation(
                &admin,
                &tenant.id,
                NewInvitation {
                    email: "joiner@example.com".to_string(),
                    role_id: Some(user_role.id.clone()),
                },
            )
            .await
            .unwrap();

        let short = service
            .accept_invitation(AcceptInvitation {
                token: issued.token.clone(),
                password: Some("short".to_string()),
                full_name: None,
            })
            .await;
        assert!(short.is_err());
        assert!(service
            .storage
            .get_user_by_email("joiner@example.com")
            .await
            .unwrap()
            .is_none());

        let accepted = service
            .accept_invitation(AcceptInvitation {
                token: issued.token.clone(),
                password: Some("long enough".to_string()),
                full_name: Some("Jo Iner".to_string()),
            })
            .await
            .unwrap();
        assert!(accepted.created_user);
        assert_eq!(accepted.invitation.status, InvitationStatus::Accepted);
        assert_eq!(accepted.invitation.user_id.as_deref(), Some(accepted.user.id.as_str()));
        assert!(accepted.invitation.accepted_at.is_some());

        let roles = service.user_roles(&accepted.user.id, &tenant.id).await.unwrap();
        assert_eq!(roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec![ROLE_USER]);

        assert!(matches!(
            service
                .accept_invitation(AcceptInvitation {
                    token: issued.token,
                    password: Some("long enough".to_string()),
                    full_name: None,
                })
                .await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_attaches_existing_user() {
        let (service, tenant, admin) = setup().await;
        let existing = testing::user(&service, "known@example.com").await;
        let issued = service
            .create_invitation(&admin, &tenant.id, invite("known@example.com"))
            .await
            .unwrap();

        let accepted = service
            .accept_invitation(AcceptInvitation {
                token: issued.token,
                password: Some("ignored password".to_string()),
                full_name: None,
            })
            .await
            .unwrap();
        assert!(!accepted.created_user);
        assert_eq!(accepted.user.id, existing.id);

        let reloaded = service.get_user(&existing.id).await.unwrap();
        assert!(verify_password("password123", &reloaded.password_hash));
        assert!(service.get_member(&tenant.id, &existing.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_invitation_is_marked() {
        let (service, tenant, admin) = setup().await;
        let issued = service
            .create_invitation(&admin, &tenant.id, invite("late@example.com"))
            .await
            .unwrap();

        let mut stored = service.get_invitation(&issued.invitation.id).await.unwrap();
        stored.expires_at = Utc::now() - Duration::seconds(1);
        service.storage.update_invitation(&stored).await.unwrap();

        assert!(matches!(
            service.verify_invitation(&issued.token).await,
            Err(ServiceError::Validation(_))
        ));
        let stored = service.get_invitation(&issued.invitation.id).await.unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);

        let fresh = service
            .create_invitation(&admin, &tenant.id, invite("late@example.com"))
            .await
            .unwrap();
        assert_ne!(fresh.invitation.id, issued.invitation.id);
    }

    #[tokio::test]
    async fn test_revoke_and_list() {
        let (service, tenant, admin) = setup().await;
        let a = service
            .create_invitation(&admin, &tenant.id, invite("a@example.com"))
            .await
            .unwrap();
        service
            .create_invitation(&admin, &tenant.id, invite("b@example.com"))
            .await
            .unwrap();

        let revoked = service.revoke_invitation(&a.invitation.id).await.unwrap();
        assert_eq!(revoked.status, InvitationStatus::Revoked);
        let again = service.revoke_invitation(&a.invitation.id).await.unwrap();
        assert_eq!(again.status, InvitationStatus::Revoked);
        assert_eq!(again.updated_at, revoked.updated_at);

        assert!(matches!(
            service.verify_invitation(&a.token).await,
            Err(ServiceError::Validation(_))
        ));

        let all = service.list_invitations(&tenant.id, false, Page::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let pending = service.list_invitations(&tenant.id, true, Page::default()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email, "b@example.com");
    }
}
