//! Bearer token middleware for protected routes.
//!
//! Wraps a router so that every request must carry a bearer token granting the
//! configured scope. Denials render the uniform RFC 6750 responses from
//! [`denial_response`].

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, header};
use std::sync::Arc;

use crate::oauth::{AccessChecker, AccessDecision, EndpointResponse, Scope, bearer_token, denial_response};

/// The scope a protected route requires, plus the checker that enforces it
#[derive(Clone)]
pub struct ScopeGuard {
    pub checker: Arc<AccessChecker>,
    pub required: Scope,
    /// Believe `X-Forwarded-Proto`; only safe behind a proxy that overwrites it
    pub trust_forwarded_proto: bool,
}

impl ScopeGuard {
    pub fn new(checker: Arc<AccessChecker>, required: Scope) -> Self {
        Self {
            checker,
            required,
            trust_forwarded_proto: false,
        }
    }

    pub fn with_trusted_forwarded_proto(mut self, trust: bool) -> Self {
        self.trust_forwarded_proto = trust;
        self
    }
}

/// The bearer token that passed the check, available to handlers as an extension
#[derive(Clone, Debug)]
pub struct AuthorizedBearer(pub String);

/// A request is secure when it arrived over TLS, or when `trust_forwarded_proto` is set
/// and the proxy in front says it did. Clients can send the header themselves, so it is
/// ignored unless trusted.
pub fn is_secure_transport(request: &Request, trust_forwarded_proto: bool) -> bool {
    request.uri().scheme_str() == Some("https")
        || (trust_forwarded_proto && forwarded_https(request.headers()))
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Middleware: reject the request unless its bearer token grants the guard's scope
pub async fn require_scope(
    State(guard): State<ScopeGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    let secure = is_secure_transport(&request, guard.trust_forwarded_proto);
    let token = bearer_token(
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
    .map(str::to_string);

    match guard
        .checker
        .check_access(token.as_deref(), &guard.required, secure)
        .await
    {
        Ok(AccessDecision::Authorized) => {
            if let Some(token) = token {
                request.extensions_mut().insert(AuthorizedBearer(token));
            }
            next.run(request).await
        }
        Ok(AccessDecision::Denied(reason)) => denial_response(reason).into_response(),
        Err(error) => EndpointResponse::error(&error, None).into_response(),
    }
}
