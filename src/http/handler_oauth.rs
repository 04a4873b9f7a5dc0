//! OAuth 2.0 endpoint handlers.
//!
//! - GET  /oauth2/authorize: validate and stage, then show the consent page
//! - POST /oauth2/authorize: the consent form's decision
//! - POST /oauth2/token: token issuance
//! - POST /oauth2/revoke: token revocation

use axum::{
    Form,
    body::Body,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use http::header;
use serde::Deserialize;

use super::context::AppState;
use crate::oauth::{AuthorizationRequest, EndpointResponse, RevocationForm, TokenForm};

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Query parameters for the authorize endpoint
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

impl From<AuthorizeQuery> for AuthorizationRequest {
    fn from(query: AuthorizeQuery) -> Self {
        Self {
            response_type: query.response_type,
            client_id: query.client_id,
            redirect_uri: query.redirect_uri,
            scope: query.scope,
            state: query.state,
        }
    }
}

/// Consent form submission
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub data_key: String,
    /// `yes` grants access; anything else denies it
    pub confirm: Option<String>,
}

fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

pub async fn handle_oauth_authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> EndpointResponse {
    state
        .authorization_endpoint
        .authorize(AuthorizationRequest::from(query))
        .await
}

pub async fn handle_oauth_consent(
    State(state): State<AppState>,
    Form(form): Form<ConsentForm>,
) -> EndpointResponse {
    if form.confirm.as_deref() == Some("yes") {
        state
            .authorization_endpoint
            .grant_access(&form.data_key, None)
            .await
    } else {
        state
            .authorization_endpoint
            .deny_access(&form.data_key)
            .await
    }
}

pub async fn handle_oauth_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> EndpointResponse {
    state
        .token_endpoint
        .handle(authorization_header(&headers), form)
        .await
}

pub async fn handle_oauth_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RevocationForm>,
) -> EndpointResponse {
    state
        .token_endpoint
        .revoke(authorization_header(&headers), form)
        .await
}
