use super::{AppState, Pagination};
use crate::model::Role;
use crate::permissions::Permission;
use crate::service::{NewRole, RoleDetail, RoleUpdate};
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query, TenantHeader};
use axum::{
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub permission_id: String,
}

/// GET /roles
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Role>>, ApiError> {
    state
        .require(&principal, tenant.as_deref(), Permission::RoleRead)
        .await?;
    Ok(Json(state.service.list_roles(page.page()).await?))
}

/// POST /roles: role definitions are global
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(body): Json<NewRole>,
) -> Result<(StatusCode, Json<RoleDetail>), ApiError> {
    state.require(&principal, None, Permission::RoleCreate).await?;
    Ok((StatusCode::CREATED, Json(state.service.create_role(body).await?)))
}

/// GET /roles/{id}
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<Json<RoleDetail>, ApiError> {
    state
        .require(&principal, tenant.as_deref(), Permission::RoleRead)
        .await?;
    Ok(Json(state.service.get_role(&id).await?))
}

/// PUT /roles/{id}
pub async fn update(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(body): Json<RoleUpdate>,
) -> Result<Json<RoleDetail>, ApiError> {
    state.require(&principal, None, Permission::RoleUpdate).await?;
    Ok(Json(state.service.update_role(&id, body).await?))
}

/// DELETE /roles/{id}
pub async fn remove(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.require(&principal, None, Permission::RoleDelete).await?;
    state.service.delete_role(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /roles/{id}/permissions
pub async fn grant(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(body): Json<GrantRequest>,
) -> Result<(StatusCode, Json<RoleDetail>), ApiError> {
    state.require(&principal, None, Permission::PermissionAssign).await?;
    let added = state.service.grant_permission(&id, &body.permission_id).await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(state.service.get_role(&id).await?)))
}

/// DELETE /roles/{id}/permissions/{permission_id}
pub async fn revoke(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((id, permission_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.require(&principal, None, Permission::PermissionAssign).await?;
    state.service.revoke_permission(&id, &permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
