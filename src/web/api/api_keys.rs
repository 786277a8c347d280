use super::{AppState, Pagination};
use crate::authz::parse_tenant_id;
use crate::model::ApiKeyView;
use crate::service::{ApiKeyUpdate, CreatedApiKey, NewApiKey};
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query, TenantHeader};
use axum::{
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub tenant_id: Option<String>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /api-keys: own keys, or every key for superusers
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(header_tenant): TenantHeader,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Vec<ApiKeyView>>, ApiError> {
    let tenant = match query.tenant_id.as_deref() {
        Some(raw) => Some(parse_tenant_id(raw)?),
        None => header_tenant,
    };
    let page = Pagination {
        skip: query.skip,
        limit: query.limit,
    };
    let keys = state
        .service
        .list_api_keys(&principal, tenant.as_deref(), page.page())
        .await?;
    Ok(Json(keys))
}

/// POST /api-keys: the full key is only in this response
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(body): Json<NewApiKey>,
) -> Result<(StatusCode, Json<CreatedApiKey>), ApiError> {
    let created = state.service.create_api_key(&principal, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api-keys/{id}
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiKeyView>, ApiError> {
    Ok(Json(state.service.get_api_key(&principal, &id).await?))
}

/// PUT /api-keys/{id}
pub async fn update(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(body): Json<ApiKeyUpdate>,
) -> Result<Json<ApiKeyView>, ApiError> {
    Ok(Json(state.service.update_api_key(&principal, &id, body).await?))
}

/// DELETE /api-keys/{id}
pub async fn remove(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_api_key(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
