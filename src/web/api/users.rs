use super::{AppState, Pagination};
use crate::model::{Role, UserView};
use crate::permissions::Permission;
use crate::service::{MemberView, NewUser, UserUpdate};
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query, TenantHeader};
use axum::{
    extract::State,
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct MemberQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
}

impl MemberQuery {
    fn pagination(&self) -> Pagination {
        Pagination {
            skip: self.skip,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(flatten)]
    pub user: NewUser,
    /// Role to grant in the tenant; the default role when absent
    pub role_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user_id: String,
    pub tenant_id: String,
    pub permissions: Vec<String>,
}

/// GET /users/me
pub async fn me(Authenticated(principal): Authenticated) -> Json<UserView> {
    Json(UserView::from(&principal.user))
}

/// GET /users: members of the tenant
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Query(query): Query<MemberQuery>,
) -> Result<Json<Vec<MemberView>>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::UserRead)
        .await?;
    let members = state
        .service
        .list_members(&tenant_id, query.search.as_deref(), query.pagination().page())
        .await?;
    Ok(Json(members))
}

/// POST /users: create a user as a member of the tenant
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<MemberView>), ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::UserCreate)
        .await?;
    let member = state
        .service
        .create_member(&principal, &tenant_id, body.user, body.role_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// GET /users/{id}: the target must belong to the tenant
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<Json<MemberView>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::UserRead)
        .await?;
    Ok(Json(state.service.get_member(&tenant_id, &id).await?))
}

/// PATCH /users/{id}
///
/// Without a tenant (superusers only) any user may be updated.
pub async fn update(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
    Json(body): Json<UserUpdate>,
) -> Result<Json<UserView>, ApiError> {
    let tenant_id = state
        .require(&principal, tenant.as_deref(), Permission::UserUpdate)
        .await?;
    if let Some(tenant_id) = &tenant_id {
        state.service.get_member(tenant_id, &id).await?;
    }

    let password_changed = body.password.is_some();
    let user = state.service.update_user(&principal, &id, body).await?;
    if password_changed || !user.is_active {
        state.auth.logout_user(&user.id);
    }
    Ok(Json(UserView::from(&user)))
}

/// DELETE /users/{id}
///
/// With a tenant this removes the user from it; without one (superusers only)
/// the account is deleted.
pub async fn remove(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state
        .require(&principal, tenant.as_deref(), Permission::UserDelete)
        .await?
    {
        Some(tenant_id) => {
            state.service.remove_from_tenant(&id, &tenant_id).await?;
        }
        None => {
            state.service.delete_user(&id).await?;
            state.auth.logout_user(&id);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{id}/roles: roles held in the tenant
pub async fn roles(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<Json<Vec<Role>>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::RoleRead)
        .await?;
    Ok(Json(state.service.user_roles(&id, &tenant_id).await?))
}

/// POST /users/{id}/roles
pub async fn assign_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<(StatusCode, Json<Vec<Role>>), ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::RoleAssign)
        .await?;
    let added = state
        .service
        .assign_role(&id, &tenant_id, &body.role_id)
        .await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(state.service.user_roles(&id, &tenant_id).await?)))
}

/// DELETE /users/{id}/roles/{role_id}
pub async fn unassign_role(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path((id, role_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::RoleAssign)
        .await?;
    state
        .service
        .unassign_role(&id, &tenant_id, &role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{id}/permissions: effective permissions in the tenant
pub async fn permissions(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::PermissionRead)
        .await?;
    let user = state.service.get_user(&id).await?;
    let permissions = state.service.user_permissions(&user, &tenant_id).await?;
    Ok(Json(PermissionsResponse {
        user_id: user.id,
        tenant_id,
        permissions,
    }))
}
