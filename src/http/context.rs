//! Application state shared by the HTTP handlers.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::oauth::{AccessChecker, AuthorizationEndpoint, GrantEngine, TokenEndpoint};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GrantEngine>,
    /// Authorize and consent-decision logic
    pub authorization_endpoint: Arc<AuthorizationEndpoint>,
    /// Token and revocation logic
    pub token_endpoint: Arc<TokenEndpoint>,
    /// Bearer token checks for protected routes
    pub access_checker: Arc<AccessChecker>,
}

impl AppState {
    pub fn new(
        engine: Arc<GrantEngine>,
        authorization_endpoint: Arc<AuthorizationEndpoint>,
        access_checker: Arc<AccessChecker>,
    ) -> Self {
        Self {
            token_endpoint: Arc::new(TokenEndpoint::new(engine.clone())),
            engine,
            authorization_endpoint,
            access_checker,
        }
    }
}

impl FromRef<AppState> for Arc<AccessChecker> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.access_checker.clone()
    }
}
