use super::{AppState, Pagination};
use crate::permissions::Permission;
use crate::service::{
    AcceptInvitation, AcceptedInvitation, InvitationDetail, IssuedInvitation, NewInvitation,
};
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, Json, Path, Query, TenantHeader};
use axum::{
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct InvitationQuery {
    #[serde(default)]
    pub pending_only: bool,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// GET /invitations
pub async fn list(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Query(query): Query<InvitationQuery>,
) -> Result<Json<Vec<InvitationDetail>>, ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::TenantManageInvitations)
        .await?;
    let page = Pagination {
        skip: query.skip,
        limit: query.limit,
    };
    let invitations = state
        .service
        .list_invitations(&tenant_id, query.pending_only, page.page())
        .await?;
    Ok(Json(invitations))
}

/// POST /invitations
pub async fn create(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    TenantHeader(tenant): TenantHeader,
    Json(body): Json<NewInvitation>,
) -> Result<(StatusCode, Json<IssuedInvitation>), ApiError> {
    let tenant_id = state
        .require_tenant(&principal, tenant.as_deref(), Permission::TenantManageInvitations)
        .await?;
    let issued = state
        .service
        .create_invitation(&principal, &tenant_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// GET /invitations/{id}: checked against the invitation's own tenant
pub async fn get(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<InvitationDetail>, ApiError> {
    let invitation = state.service.get_invitation(&id).await?;
    state
        .require(
            &principal,
            Some(&invitation.tenant_id),
            Permission::TenantManageInvitations,
        )
        .await?;
    Ok(Json(state.service.invitation_detail(&invitation).await?))
}

/// POST /invitations/{id}/revoke
pub async fn revoke(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<InvitationDetail>, ApiError> {
    let invitation = state.service.get_invitation(&id).await?;
    state
        .require(
            &principal,
            Some(&invitation.tenant_id),
            Permission::TenantManageInvitations,
        )
        .await?;
    let revoked = state.service.revoke_invitation(&invitation.id).await?;
    Ok(Json(state.service.invitation_detail(&revoked).await?))
}

/// POST /invitations/verify: public
pub async fn verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<InvitationDetail>, ApiError> {
    let invitation = state.service.verify_invitation(&body.token).await?;
    Ok(Json(state.service.invitation_detail(&invitation).await?))
}

/// POST /invitations/accept: public
pub async fn accept(
    State(state): State<AppState>,
    Json(body): Json<AcceptInvitation>,
) -> Result<Json<AcceptedInvitation>, ApiError> {
    Ok(Json(state.service.accept_invitation(body).await?))
}
