//! REST API for tenantry
//!
//! JSON endpoints under a configurable prefix (`/api/v1` by default) for:
//! - Login and logout
//! - Users, tenants, roles and the permission catalog
//! - API keys and invitations

mod api;
mod error;
mod extract;
mod server;

pub use error::ApiError;
pub use extract::{Authenticated, ClientIp, TenantHeader, API_KEY_HEADER};
pub use server::{build_router, AppState, WebServer};
