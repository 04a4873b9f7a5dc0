//! Axum HTTP binding of the OAuth 2.0 endpoints and bearer-token middleware.

pub mod context;
pub mod handler_oauth;
pub mod middleware_auth;
pub mod server;

pub use context::AppState;
pub use middleware_auth::{AuthorizedBearer, ScopeGuard};
pub use server::{build_router, build_router_with, protect};
