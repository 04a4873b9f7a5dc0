//! Router configuration assembling the OAuth 2.0 endpoints.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    context::AppState,
    handler_oauth::{
        handle_oauth_authorize, handle_oauth_consent, handle_oauth_revoke, handle_oauth_token,
    },
    middleware_auth::{ScopeGuard, require_scope},
};

/// Build the application router with the OAuth endpoints nested under `/oauth2`.
pub fn build_router(ctx: AppState) -> Router {
    build_router_with(ctx, Router::new())
}

/// Build the router and merge in `resources`, routes the caller has already
/// wrapped with [`protect`] or left public.
pub fn build_router_with(ctx: AppState, resources: Router<AppState>) -> Router {
    let oauth_routes = Router::new()
        .route(
            "/authorize",
            get(handle_oauth_authorize).post(handle_oauth_consent),
        )
        .route("/token", post(handle_oauth_token))
        .route("/revoke", post(handle_oauth_revoke))
        .layer(CorsLayer::permissive());

    Router::new()
        .nest("/oauth2", oauth_routes)
        .merge(resources)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Require a bearer token granting `guard.required` on every route of `routes`.
pub fn protect(routes: Router<AppState>, guard: ScopeGuard) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(guard, require_scope))
}
