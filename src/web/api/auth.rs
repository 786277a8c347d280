use super::AppState;
use crate::auth::{extract_bearer, AuthError, LoginOutcome};
use crate::authz::Credential;
use crate::web::error::ApiError;
use crate::web::extract::{Authenticated, ClientIp};
use axum::{
    extract::{Form, FromRequest, Json, Request, State},
    http::{header, HeaderMap, StatusCode},
};
use serde::Deserialize;

/// OAuth2 password-grant style credentials
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// The user's email
    pub username: String,
    pub password: String,
}

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Read credentials from a JSON or form-encoded body
async fn login_request(req: Request) -> Result<LoginRequest, ApiError> {
    if is_json(&req) {
        let Json(body) = Json::<LoginRequest>::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(body)
    } else {
        let Form(body) = Form::<LoginRequest>::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(body)
    }
}

/// POST /auth/token
pub async fn token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    req: Request,
) -> Result<Json<LoginOutcome>, ApiError> {
    if let Err(retry_after_secs) = state.limiter.check(&ip).await {
        return Err(AuthError::RateLimited { retry_after_secs }.into());
    }

    let credentials = login_request(req).await?;
    match state.auth.login(&credentials.username, &credentials.password).await {
        Ok(outcome) => {
            state.limiter.clear(&ip).await;
            Ok(Json(outcome))
        }
        Err(e @ (AuthError::InvalidCredentials | AuthError::InactiveUser)) => {
            state.limiter.record_failure(&ip).await;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /auth/logout: ends the presenting session
pub async fn logout(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    if principal.credential != Credential::Session {
        return Err(ApiError::bad_request("logout requires a session token"));
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = extract_bearer(auth_header)?;
    state.auth.logout(&token);
    tracing::info!(user_id = %principal.user_id(), "User logged out");
    Ok(StatusCode::NO_CONTENT)
}
