//! HTTP server implementation using Axum

use crate::auth::{Authenticator, LoginRateLimiter};
use crate::authz::{resolve_tenant, Principal, Requirement};
use crate::config::Config;
use crate::service::IamService;
use axum::{extract::FromRef, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::api;
use super::error::ApiError;

/// How often expired sessions and stale rate-limit entries are dropped
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IamService>,
    pub auth: Arc<Authenticator>,
    pub limiter: LoginRateLimiter,
    pub config: Arc<Config>,
}

impl FromRef<AppState> for Arc<IamService> {
    fn from_ref(state: &AppState) -> Self {
        state.service.clone()
    }
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl AppState {
    pub fn new(service: Arc<IamService>, config: Config) -> Self {
        let auth = Authenticator::new(service.storage().clone(), &config.auth);
        let limiter = LoginRateLimiter::new(config.auth.login_max_attempts, config.auth.login_window);
        Self {
            service,
            auth: Arc::new(auth),
            limiter,
            config: Arc::new(config),
        }
    }

    /// Authorize a request and return the tenant it acts in, if any
    pub async fn require(
        &self,
        principal: &Principal,
        tenant: Option<&str>,
        requirement: impl Into<Requirement>,
    ) -> Result<Option<String>, ApiError> {
        let tenant = resolve_tenant(principal, tenant)?;
        self.service
            .authorizer()
            .require(principal, tenant.as_deref(), &requirement.into())
            .await?;
        Ok(tenant)
    }

    /// Like [`require`](Self::require) for operations that need a tenant
    pub async fn require_tenant(
        &self,
        principal: &Principal,
        tenant: Option<&str>,
        requirement: impl Into<Requirement>,
    ) -> Result<String, ApiError> {
        self.require(principal, tenant, requirement)
            .await?
            .ok_or_else(ApiError::tenant_required)
    }
}

/// Build the router with every route nested under the API prefix
pub fn build_router(state: AppState) -> Router {
    let prefix = state.config.server.api_prefix.clone();
    Router::new()
        .nest(&prefix, api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// REST server for tenantry
pub struct WebServer {
    bind: String,
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self {
            bind: state.config.server.bind.clone(),
            state,
        }
    }

    /// Drop expired sessions and stale login attempts on an interval
    fn spawn_housekeeping(&self) {
        let auth = self.state.auth.clone();
        let limiter = self.state.limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
            loop {
                ticker.tick().await;
                let purged = auth.sessions().purge_expired(Utc::now());
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired sessions");
                }
                limiter.cleanup().await;
            }
        });
    }

    /// Run the server until the process is stopped
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        self.spawn_housekeeping();

        tracing::info!(
            bind = %self.bind,
            prefix = %self.state.config.server.api_prefix,
            "Starting tenantry API"
        );

        let router = build_router(self.state);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    /// Get the bind address
    pub fn bind_address(&self) -> &str {
        &self.bind
    }
}
