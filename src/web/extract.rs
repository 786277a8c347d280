//! Request extractors
//!
//! - `Authenticated`: resolves the caller's credential, 401 when absent or bad
//! - `TenantHeader`: the optional `X-Tenant-ID` header, 400 when malformed
//! - `ClientIp`: peer address used for login rate limiting
//! - `Json`, `Query`, `Path`: axum's extractors with rejections rendered as
//!   [`ApiError`] bodies

use super::error::ApiError;
use super::server::AppState;
use crate::auth::extract_credential;
use crate::authz::{parse_tenant_id, Principal, TENANT_HEADER};
use axum::{
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Header carrying a raw API key
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Default, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extractor requiring an authenticated principal
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let query = axum::extract::Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
            .map(|axum::extract::Query(q)| q)
            .unwrap_or_default();
        let credential = extract_credential(
            header_str(parts, header::AUTHORIZATION.as_str()),
            header_str(parts, API_KEY_HEADER),
            query.api_key.as_deref(),
        )?;

        let principal = state.auth.authenticate(&credential).await?;
        Ok(Authenticated(principal))
    }
}

/// The tenant named by `X-Tenant-ID`, validated as a UUID
#[derive(Debug, Clone, Default)]
pub struct TenantHeader(pub Option<String>);

impl<S> FromRequestParts<S> for TenantHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(TENANT_HEADER) else {
            return Ok(TenantHeader(None));
        };
        let raw = value
            .to_str()
            .map_err(|_| ApiError::bad_request("X-Tenant-ID must be a UUID"))?;
        if raw.trim().is_empty() {
            return Ok(TenantHeader(None));
        }
        Ok(TenantHeader(Some(parse_tenant_id(raw)?)))
    }
}

/// Peer address from the connection. Unspecified when the server was not
/// started with connect info (e.g. under test)
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(ClientIp(ip))
    }
}

/// JSON request body; also usable as a response
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Json(value))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Query string parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct Query<T>(pub T);

impl<T, S> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state).await?;
        Ok(Query(value))
    }
}

/// Path segments
#[derive(Debug, Clone, Copy, Default)]
pub struct Path<T>(pub T);

impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(value) =
            axum::extract::Path::<T>::from_request_parts(parts, state).await?;
        Ok(Path(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn test_tenant_header() {
        let id = "3f2b8c1e-9d4a-4e5b-8f6a-1c2d3e4f5a6b";
        let req = Request::builder().header(TENANT_HEADER, id).body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let TenantHeader(tenant) = TenantHeader::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(tenant.as_deref(), Some(id));

        let req = Request::builder().body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let TenantHeader(tenant) = TenantHeader::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(tenant.is_none());
    }

    #[tokio::test]
    async fn test_malformed_tenant_header() {
        let req = Request::builder()
            .header(TENANT_HEADER, "acme")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let err = TenantHeader::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_client_ip_fallback() {
        let req = Request::builder().body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(ip.is_unspecified());

        let mut req = Request::builder().body(()).unwrap();
        let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        let (mut parts, _) = req.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, addr.ip());
    }
}
