//! JSON error responses

use crate::auth::AuthError;
use crate::authz::{AuthzError, DecisionReason};
use crate::service::ServiceError;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// An error on its way to becoming an HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Seconds for `Retry-After`, set when rate limited
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn tenant_required() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "tenant_required",
            "X-Tenant-ID header is required for this operation",
        )
    }

    fn internal(message: impl std::fmt::Display) -> Self {
        tracing::error!(error = %message, "Request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
                code: self.code,
            }),
        )
            .into_response();

        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

fn reason_code(reason: &DecisionReason) -> &'static str {
    match reason {
        DecisionReason::InactivePrincipal => "inactive_user",
        DecisionReason::GlobalPermissionRequired => "global_permission_required",
        DecisionReason::NoTenantContext => "no_tenant_context",
        DecisionReason::TenantInactive => "tenant_inactive",
        DecisionReason::TenantMismatch => "tenant_mismatch",
        DecisionReason::NotMember => "not_member",
        DecisionReason::MissingPermissions(_) => "missing_permissions",
        DecisionReason::Superuser | DecisionReason::Granted => "forbidden",
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let unauthorized = |code| ApiError::new(StatusCode::UNAUTHORIZED, code, e.to_string());
        match &e {
            AuthError::MissingCredentials => unauthorized("missing_credentials"),
            AuthError::InvalidScheme => unauthorized("invalid_scheme"),
            AuthError::InvalidCredentials => unauthorized("invalid_credentials"),
            AuthError::InvalidToken => unauthorized("invalid_token"),
            AuthError::TokenExpired => unauthorized("token_expired"),
            AuthError::InvalidApiKey => unauthorized("invalid_api_key"),
            AuthError::ApiKeyExpired => unauthorized("api_key_expired"),
            AuthError::InactiveUser => unauthorized("inactive_user"),
            AuthError::RateLimited { retry_after_secs } => ApiError {
                retry_after: Some(*retry_after_secs),
                ..ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", e.to_string())
            },
            AuthError::WeakPassword(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "weak_password", e.to_string())
            }
            AuthError::Hashing(_) | AuthError::Storage(_) => ApiError::internal(&e),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(e: AuthzError) -> Self {
        match &e {
            AuthzError::Forbidden(reason) => {
                ApiError::new(StatusCode::FORBIDDEN, reason_code(reason), e.to_string())
            }
            AuthzError::TenantNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "tenant_not_found", e.to_string())
            }
            AuthzError::InvalidTenantId(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_tenant_id", e.to_string())
            }
            AuthzError::Storage(_) => ApiError::internal(&e),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "not_found", e.to_string())
            }
            ServiceError::Conflict(_) => {
                ApiError::new(StatusCode::CONFLICT, "conflict", e.to_string())
            }
            ServiceError::Validation(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
            }
            ServiceError::Forbidden(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "forbidden", e.to_string())
            }
            ServiceError::Auth(e) => e.into(),
            ServiceError::Authz(e) => e.into(),
            ServiceError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well-formed JSON that does not fit the expected shape
            JsonRejection::JsonDataError(e) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.body_text())
            }
            other => ApiError::bad_request(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Permission;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (AuthError::MissingCredentials.into(), StatusCode::UNAUTHORIZED),
            (
                AuthzError::Forbidden(DecisionReason::MissingPermissions(vec![Permission::VmRead]))
                    .into(),
                StatusCode::FORBIDDEN,
            ),
            (AuthzError::InvalidTenantId("x".into()).into(), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("x".into()).into(), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()).into(), StatusCode::CONFLICT),
            (ServiceError::Validation("x".into()).into(), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ServiceError::Auth(AuthError::WeakPassword("short".into())).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status, status, "{}", error.code);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::from(AuthError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_unauthorized_challenges() {
        let response = ApiError::from(AuthError::InvalidToken).into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
