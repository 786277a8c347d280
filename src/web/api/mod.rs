//! JSON API handlers
//!
//! Handlers authenticate with [`Authenticated`](super::Authenticated), check
//! the tenant-scoped requirement through [`AppState::require`] and then call
//! into the service.

mod api_keys;
mod auth;
mod invitations;
mod permissions;
mod roles;
mod tenants;
mod users;

use super::server::AppState;
use crate::model::Page;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};

/// `skip`/`limit` query parameters shared by list endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn page(&self) -> Page {
        Page::new(self.skip.unwrap_or(0), self.limit.unwrap_or(Page::MAX_LIMIT))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Authentication
        .route("/auth/token", post(auth::token))
        .route("/auth/logout", post(auth::logout))
        // Users
        .route("/users/me", get(users::me))
        .route("/users", get(users::list).post(users::create))
        .route(
            "/users/{id}",
            get(users::get).patch(users::update).delete(users::remove),
        )
        .route("/users/{id}/roles", get(users::roles).post(users::assign_role))
        .route("/users/{id}/roles/{role_id}", delete(users::unassign_role))
        .route("/users/{id}/permissions", get(users::permissions))
        // Tenants
        .route("/tenants", get(tenants::list).post(tenants::create))
        .route(
            "/tenants/{id}",
            get(tenants::get).put(tenants::update).delete(tenants::remove),
        )
        // Roles and the permission catalog
        .route("/roles", get(roles::list).post(roles::create))
        .route(
            "/roles/{id}",
            get(roles::get).put(roles::update).delete(roles::remove),
        )
        .route("/roles/{id}/permissions", post(roles::grant))
        .route(
            "/roles/{id}/permissions/{permission_id}",
            delete(roles::revoke),
        )
        .route("/permissions", get(permissions::list))
        .route("/permissions/{id}", get(permissions::get))
        // API keys
        .route("/api-keys", get(api_keys::list).post(api_keys::create))
        .route(
            "/api-keys/{id}",
            get(api_keys::get).put(api_keys::update).delete(api_keys::remove),
        )
        // Invitations
        .route(
            "/invitations",
            get(invitations::list).post(invitations::create),
        )
        .route("/invitations/verify", post(invitations::verify))
        .route("/invitations/accept", post(invitations::accept))
        .route("/invitations/{id}", get(invitations::get))
        .route("/invitations/{id}/revoke", post(invitations::revoke))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness plus a storage round trip
async fn health(State(state): State<AppState>) -> Response {
    match state.service.health_check().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
                .into_response()
        }
    }
}
