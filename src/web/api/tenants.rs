use super::{AppState, Pagination};
use crate::model::Tenant;
use crate::permissions::Permission;
use crate::service::{NewTenant, TenantUpdate};
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query};
use axum::{
    extract::State,
    http::StatusCode,
};

/// GET /tenants: tenants the caller belongs to (all for superusers)
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    Ok(Json(state.service.list_tenants(&principal, page.page()).await?))
}

/// POST /tenants: global operation
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(body): Json<NewTenant>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    state.require(&principal, None, Permission::TenantCreate).await?;
    let tenant = state.service.create_tenant(body).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// GET /tenants/{id}
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, Some(&id), Permission::TenantRead)
        .await?;
    Ok(Json(state.service.get_tenant(&tenant_id).await?))
}

/// PUT /tenants/{id}
pub async fn update(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(body): Json<TenantUpdate>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, Some(&id), Permission::TenantUpdate)
        .await?;
    Ok(Json(state.service.update_tenant(&tenant_id, body).await?))
}

/// DELETE /tenants/{id}
pub async fn remove(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, Some(&id), Permission::TenantDelete)
        .await?;
    state.service.delete_tenant(&tenant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
