//! Tenant-scoped authorization
//!
//! Every protected operation asks the [`Authorizer`] whether a [`Principal`]
//! may exercise a [`Requirement`] inside a tenant. The answer is a
//! [`Decision`] carrying the reason, so callers can log or report it.

mod principal;
mod tenant;

pub use principal::{Credential, Principal};
pub use tenant::{parse_tenant_id, resolve_tenant, TENANT_HEADER};

use crate::model::User;
use crate::permissions::Permission;
use crate::storage::{StorageBackend, StorageError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Permissions an operation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    One(Permission),
    /// At least one of the listed permissions
    Any(Vec<Permission>),
    /// Every listed permission
    All(Vec<Permission>),
}

impl Requirement {
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Requirement::One(p) => vec![*p],
            Requirement::Any(ps) | Requirement::All(ps) => ps.clone(),
        }
    }

    /// Whether any listed permission can only be exercised globally
    pub fn has_global(&self) -> bool {
        self.permissions().iter().any(Permission::is_global)
    }

    /// Whether `granted` satisfies the requirement. An empty list is never met
    pub fn is_met(&self, granted: &HashSet<Permission>) -> bool {
        match self {
            Requirement::One(p) => granted.contains(p),
            Requirement::Any(ps) => ps.iter().any(|p| granted.contains(p)),
            Requirement::All(ps) => !ps.is_empty() && ps.iter().all(|p| granted.contains(p)),
        }
    }

    /// Permissions from the requirement absent from `granted`
    pub fn missing(&self, granted: &HashSet<Permission>) -> Vec<Permission> {
        match self {
            Requirement::One(p) if granted.contains(p) => Vec::new(),
            Requirement::One(p) => vec![*p],
            Requirement::Any(ps) if ps.iter().any(|p| granted.contains(p)) => Vec::new(),
            Requirement::Any(ps) => ps.clone(),
            Requirement::All(ps) => ps
                .iter()
                .filter(|p| !granted.contains(p))
                .copied()
                .collect(),
        }
    }
}

impl From<Permission> for Requirement {
    fn from(permission: Permission) -> Self {
        Requirement::One(permission)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ps: &[Permission], sep: &str| {
            ps.iter()
                .map(|p| p.code())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Requirement::One(p) => write!(f, "{}", p),
            Requirement::Any(ps) => write!(f, "any of [{}]", join(ps, ", ")),
            Requirement::All(ps) => write!(f, "all of [{}]", join(ps, ", ")),
        }
    }
}

/// Why a decision went the way it did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    Superuser,
    Granted,
    InactivePrincipal,
    GlobalPermissionRequired,
    NoTenantContext,
    TenantInactive,
    TenantMismatch,
    NotMember,
    MissingPermissions(Vec<Permission>),
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Superuser => write!(f, "superuser"),
            DecisionReason::Granted => write!(f, "granted"),
            DecisionReason::InactivePrincipal => write!(f, "user is inactive"),
            DecisionReason::GlobalPermissionRequired => {
                write!(f, "operation requires global privileges")
            }
            DecisionReason::NoTenantContext => write!(f, "no tenant context"),
            DecisionReason::TenantInactive => write!(f, "tenant is inactive"),
            DecisionReason::TenantMismatch => {
                write!(f, "API key is not valid for the requested tenant")
            }
            DecisionReason::NotMember => write!(f, "user is not a member of the tenant"),
            DecisionReason::MissingPermissions(ps) => {
                let codes: Vec<_> = ps.iter().map(|p| p.code()).collect();
                write!(f, "missing permissions: {}", codes.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Forbidden: {0}")]
    Forbidden(DecisionReason),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Evaluates requirements against role assignments in storage
#[derive(Clone)]
pub struct Authorizer {
    storage: Arc<dyn StorageBackend>,
}

impl Authorizer {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Decide whether `principal` meets `requirement` in `tenant`.
    ///
    /// `tenant` is the tenant the request named, if any. Denials come back as
    /// a [`Decision`]; errors are reserved for malformed input, unknown tenants
    /// and storage failures.
    pub async fn authorize(
        &self,
        principal: &Principal,
        tenant: Option<&str>,
        requirement: &Requirement,
    ) -> Result<Decision, AuthzError> {
        let decision = self.decide(principal, tenant, requirement).await?;
        if decision.allowed {
            tracing::trace!(
                user_id = %principal.user_id(),
                requirement = %requirement,
                reason = %decision.reason,
                "Access granted"
            );
        } else {
            tracing::debug!(
                user_id = %principal.user_id(),
                tenant_id = ?tenant,
                requirement = %requirement,
                reason = %decision.reason,
                "Access denied"
            );
        }
        Ok(decision)
    }

    /// Like [`authorize`](Self::authorize) but turns a denial into an error
    pub async fn require(
        &self,
        principal: &Principal,
        tenant: Option<&str>,
        requirement: &Requirement,
    ) -> Result<(), AuthzError> {
        let decision = self.authorize(principal, tenant, requirement).await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(AuthzError::Forbidden(decision.reason))
        }
    }

    async fn decide(
        &self,
        principal: &Principal,
        tenant: Option<&str>,
        requirement: &Requirement,
    ) -> Result<Decision, AuthzError> {
        if !principal.is_active() {
            return Ok(Decision::deny(DecisionReason::InactivePrincipal));
        }

        let tenant_id = match resolve_tenant(principal, tenant) {
            Ok(tenant_id) => tenant_id,
            Err(AuthzError::Forbidden(reason)) => return Ok(Decision::deny(reason)),
            Err(e) => return Err(e),
        };

        if principal.has_global_access() {
            return Ok(Decision::allow(DecisionReason::Superuser));
        }

        if requirement.has_global() {
            return Ok(Decision::deny(DecisionReason::GlobalPermissionRequired));
        }

        let Some(tenant_id) = tenant_id else {
            return Ok(Decision::deny(DecisionReason::NoTenantContext));
        };

        let tenant = self
            .storage
            .get_tenant(&tenant_id)
            .await?
            .ok_or_else(|| AuthzError::TenantNotFound(tenant_id.clone()))?;
        if !tenant.is_active {
            return Ok(Decision::deny(DecisionReason::TenantInactive));
        }

        // A superuser's pinned key acts as superuser inside its own tenant
        if principal.is_superuser() {
            return Ok(Decision::allow(DecisionReason::Superuser));
        }

        let roles = self
            .storage
            .list_user_roles(principal.user_id(), &tenant.id)
            .await?;
        if roles.is_empty() {
            return Ok(Decision::deny(DecisionReason::NotMember));
        }

        let granted = self.tenant_permissions(principal.user_id(), &tenant.id).await?;
        if requirement.is_met(&granted) {
            Ok(Decision::allow(DecisionReason::Granted))
        } else {
            let missing = requirement.missing(&granted);
            Ok(Decision::deny(DecisionReason::MissingPermissions(missing)))
        }
    }

    /// Everything the user may do in a tenant. Superusers get the whole catalog
    pub async fn effective_permissions(
        &self,
        user: &User,
        tenant_id: &str,
    ) -> Result<HashSet<Permission>, AuthzError> {
        if user.is_superuser {
            return Ok(Permission::all());
        }
        self.tenant_permissions(&user.id, tenant_id).await
    }

    /// Whether the user holds at least one role in the tenant
    pub async fn is_member(&self, user_id: &str, tenant_id: &str) -> Result<bool, AuthzError> {
        Ok(!self
            .storage
            .list_user_roles(user_id, tenant_id)
            .await?
            .is_empty())
    }

    async fn tenant_permissions(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<HashSet<Permission>, AuthzError> {
        let codes = self
            .storage
            .list_user_permission_codes(user_id, tenant_id)
            .await?;

        let mut granted = HashSet::with_capacity(codes.len());
        for code in codes {
            match code.parse::<Permission>() {
                Ok(p) => {
                    granted.insert(p);
                }
                Err(_) => {
                    tracing::warn!(code = %code, "Ignoring unknown permission code");
                }
            }
        }
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiKey, PermissionRecord, Role, RoleAssignment, Tenant};
    use crate::storage::FileStorage;

    struct Fixture {
        storage: Arc<dyn StorageBackend>,
        authz: Authorizer,
        acme: Tenant,
        globex: Tenant,
    }

    async fn fixture() -> Fixture {
        let storage: Arc<dyn StorageBackend> = Arc::new(FileStorage::in_memory());
        let acme = Tenant::new("Acme", None);
        let globex = Tenant::new("Globex", None);
        storage.create_tenant(&acme).await.unwrap();
        storage.create_tenant(&globex).await.unwrap();

        for p in Permission::ALL {
            storage
                .create_permission(&PermissionRecord {
                    id: crate::model::new_id(),
                    code: p.code().to_string(),
                    name: p.label(),
                    description: None,
                })
                .await
                .unwrap();
        }

        Fixture {
            authz: Authorizer::new(storage.clone()),
            storage,
            acme,
            globex,
        }
    }

    impl Fixture {
        async fn role(&self, name: &str, permissions: &[Permission]) -> Role {
            let role = Role::new(name);
            self.storage.create_role(&role).await.unwrap();
            for p in permissions {
                let record = self
                    .storage
                    .get_permission_by_code(p.code())
                    .await
                    .unwrap()
                    .unwrap();
                self.storage
                    .add_role_permission(&role.id, &record.id)
                    .await
                    .unwrap();
            }
            role
        }

        async fn user(&self, email: &str) -> User {
            let user = User::new(email, "hash");
            self.storage.create_user(&user).await.unwrap();
            user
        }

        async fn assign(&self, user: &User, tenant: &Tenant, role: &Role) {
            self.storage
                .add_role_assignment(&RoleAssignment::new(&user.id, &tenant.id, &role.id))
                .await
                .unwrap();
        }
    }

    fn key(user: &User, tenant: Option<&Tenant>) -> ApiKey {
        crate::storage::conformance::api_key(&user.id, tenant.map(|t| t.id.as_str()), "hash")
    }

    #[tokio::test]
    async fn test_member_granted_and_missing() {
        let f = fixture().await;
        let viewer = f.role("reader", &[Permission::VmRead]).await;
        let user = f.user("bob@example.com").await;
        f.assign(&user, &f.acme, &viewer).await;
        let principal = Principal::session(user);

        let decision = f
            .authz
            .authorize(&principal, Some(&f.acme.id), &Permission::VmRead.into())
            .await
            .unwrap();
        assert_eq!(decision, Decision::allow(DecisionReason::Granted));

        let decision = f
            .authz
            .authorize(&principal, Some(&f.acme.id), &Permission::VmStart.into())
            .await
            .unwrap();
        assert_eq!(
            decision.reason,
            DecisionReason::MissingPermissions(vec![Permission::VmStart])
        );
    }

    #[tokio::test]
    async fn test_roles_do_not_leak_across_tenants() {
        let f = fixture().await;
        let operator = f.role("operator", &[Permission::VmStart]).await;
        let reader = f.role("reader", &[Permission::VmRead]).await;
        let user = f.user("carol@example.com").await;
        f.assign(&user, &f.acme, &operator).await;
        f.assign(&user, &f.globex, &reader).await;
        let principal = Principal::session(user.clone());

        assert!(f
            .authz
            .require(&principal, Some(&f.acme.id), &Permission::VmStart.into())
            .await
            .is_ok());
        assert!(matches!(
            f.authz
                .require(&principal, Some(&f.globex.id), &Permission::VmStart.into())
                .await,
            Err(AuthzError::Forbidden(DecisionReason::MissingPermissions(_)))
        ));

        let acme = f.authz.effective_permissions(&user, &f.acme.id).await.unwrap();
        assert_eq!(acme, HashSet::from([Permission::VmStart]));
    }

    #[tokio::test]
    async fn test_union_across_roles() {
        let f = fixture().await;
        let a = f.role("a", &[Permission::VmRead]).await;
        let b = f.role("b", &[Permission::VmStop]).await;
        let user = f.user("dan@example.com").await;
        f.assign(&user, &f.acme, &a).await;
        f.assign(&user, &f.acme, &b).await;
        let principal = Principal::session(user);

        let both = Requirement::All(vec![Permission::VmRead, Permission::VmStop]);
        assert!(f.authz.require(&principal, Some(&f.acme.id), &both).await.is_ok());

        let any = Requirement::Any(vec![Permission::VmDelete, Permission::VmStop]);
        assert!(f.authz.require(&principal, Some(&f.acme.id), &any).await.is_ok());

        let all = Requirement::All(vec![Permission::VmRead, Permission::VmDelete]);
        let decision = f
            .authz
            .authorize(&principal, Some(&f.acme.id), &all)
            .await
            .unwrap();
        assert_eq!(
            decision.reason,
            DecisionReason::MissingPermissions(vec![Permission::VmDelete])
        );
    }

    #[tokio::test]
    async fn test_empty_requirement_denies_members() {
        let f = fixture().await;
        let role = f.role("reader", &[Permission::VmRead]).await;
        let user = f.user("erin@example.com").await;
        f.assign(&user, &f.acme, &role).await;
        let principal = Principal::session(user);

        for requirement in [Requirement::Any(Vec::new()), Requirement::All(Vec::new())] {
            let decision = f
                .authz
                .authorize(&principal, Some(&f.acme.id), &requirement)
                .await
                .unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.reason, DecisionReason::MissingPermissions(Vec::new()));
        }
    }

    #[test]
    fn test_requirement_is_met() {
        let granted: HashSet<_> = [Permission::VmRead].into_iter().collect();
        assert!(Requirement::One(Permission::VmRead).is_met(&granted));
        assert!(Requirement::Any(vec![Permission::VmStop, Permission::VmRead]).is_met(&granted));
        assert!(!Requirement::Any(Vec::new()).is_met(&granted));
        assert!(!Requirement::All(Vec::new()).is_met(&granted));
        assert!(!Requirement::All(vec![Permission::VmRead, Permission::VmStop]).is_met(&granted));
    }

    #[tokio::test]
    async fn test_non_member_and_missing_context() {
        let f = fixture().await;
        let principal = Principal::session(f.user("eve@example.com").await);

        let decision = f
            .authz
            .authorize(&principal, Some(&f.acme.id), &Permission::TenantRead.into())
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::NotMember);

        let decision = f
            .authz
            .authorize(&principal, None, &Permission::TenantRead.into())
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::NoTenantContext);

        let unknown = crate::model::new_id();
        assert!(matches!(
            f.authz
                .authorize(&principal, Some(&unknown), &Permission::TenantRead.into())
                .await,
            Err(AuthzError::TenantNotFound(_))
        ));
        assert!(matches!(
            f.authz
                .authorize(&principal, Some("acme"), &Permission::TenantRead.into())
                .await,
            Err(AuthzError::InvalidTenantId(_))
        ));
    }

    #[tokio::test]
    async fn test_inactive_user_and_tenant() {
        let f = fixture().await;
        let admin = f.role("everything", &Permission::ALL).await;
        let mut user = f.user("frank@example.com").await;
        f.assign(&user, &f.acme, &admin).await;

        let mut tenant = f.acme.clone();
        tenant.is_active = false;
        f.storage.update_tenant(&tenant).await.unwrap();
        let decision = f
            .authz
            .authorize(
                &Principal::session(user.clone()),
                Some(&f.acme.id),
                &Permission::VmRead.into(),
            )
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::TenantInactive);

        user.is_active = false;
        let decision = f
            .authz
            .authorize(
                &Principal::session(user),
                Some(&f.acme.id),
                &Permission::VmRead.into(),
            )
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::InactivePrincipal);
    }

    #[tokio::test]
    async fn test_global_permissions_need_superuser() {
        let f = fixture().await;
        let admin = f.role("everything", &Permission::ALL).await;
        let user = f.user("grace@example.com").await;
        f.assign(&user, &f.acme, &admin).await;

        let decision = f
            .authz
            .authorize(
                &Principal::session(user),
                Some(&f.acme.id),
                &Permission::TenantCreate.into(),
            )
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::GlobalPermissionRequired);

        let root = f.user("root@example.com").await.superuser();
        let decision = f
            .authz
            .authorize(&Principal::session(root), None, &Permission::TenantCreate.into())
            .await
            .unwrap();
        assert_eq!(decision, Decision::allow(DecisionReason::Superuser));
    }

    #[tokio::test]
    async fn test_pinned_key_stays_in_its_tenant() {
        let f = fixture().await;
        let admin = f.role("everything", &Permission::ALL).await;
        let user = f.user("heidi@example.com").await;
        f.assign(&user, &f.acme, &admin).await;
        f.assign(&user, &f.globex, &admin).await;

        let principal = Principal::api_key(user.clone(), &key(&user, Some(&f.acme)));
        assert!(f
            .authz
            .require(&principal, None, &Permission::VmRead.into())
            .await
            .is_ok());
        let decision = f
            .authz
            .authorize(&principal, Some(&f.globex.id), &Permission::VmRead.into())
            .await
            .unwrap();
        assert_eq!(decision.reason, DecisionReason::TenantMismatch);

        let global = Principal::api_key(user.clone(), &key(&user, None));
        assert!(f
            .authz
            .require(&global, Some(&f.globex.id), &Permission::VmRead.into())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_superuser_pinned_key() {
        let f = fixture().await;
        let root = f.user("root@example.com").await.superuser();
        let principal = Principal::api_key(root.clone(), &key(&root, Some(&f.acme)));

        assert_eq!(
            f.authz
                .authorize(&principal, None, &Permission::VmDelete.into())
                .await
                .unwrap()
                .reason,
            DecisionReason::Superuser
        );
        assert_eq!(
            f.authz
                .authorize(&principal, Some(&f.globex.id), &Permission::VmDelete.into())
                .await
                .unwrap()
                .reason,
            DecisionReason::TenantMismatch
        );
        assert_eq!(
            f.authz
                .authorize(&principal, None, &Permission::TenantCreate.into())
                .await
                .unwrap()
                .reason,
            DecisionReason::GlobalPermissionRequired
        );

        let all = f.authz.effective_permissions(&root, &f.globex.id).await.unwrap();
        assert_eq!(all.len(), Permission::ALL.len());
    }

    #[test]
    fn test_requirement_display() {
        assert_eq!(Requirement::One(Permission::VmRead).to_string(), "vm:read");
        assert_eq!(
            Requirement::Any(vec![Permission::VmRead, Permission::VmStop]).to_string(),
            "any of [vm:read, vm:stop]"
        );
        assert!(Requirement::All(vec![Permission::VmRead, Permission::TenantCreate]).has_global());
    }
}
