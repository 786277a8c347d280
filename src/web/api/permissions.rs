use super::{AppState, Pagination};
use crate::model::PermissionRecord;
use crate::permissions::Permission;
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query, TenantHeader};
use axum::extract::State;

/// GET /permissions: the catalog
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<PermissionRecord>>, ApiError> {
    state
        .require(&principal, tenant.as_deref(), Permission::PermissionRead)
        .await?;
    Ok(Json(state.service.list_permissions(page.page()).await?))
}

/// GET /permissions/{id}
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<Json<PermissionRecord>, ApiError> {
    state
        .require(&principal, tenant.as_deref(), Permission::PermissionRead)
        .await?;
    Ok(Json(state.service.get_permission(&id).await?))
}
