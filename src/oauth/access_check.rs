//! Bearer token access checks for protected resources (RFC 6750).

use http::{HeaderValue, StatusCode, header};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{OAuthError, StorageError};
use crate::oauth::response::EndpointResponse;
use crate::oauth::scope::Scope;
use crate::oauth::types::{OAuthErrorResponse, TokenKind};
use crate::storage::{TokenStore, bounded};

/// Why access was refused. Only logged; invalid and under-scoped tokens render the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    InsecureTransport,
    MissingToken,
    InvalidToken,
    InsufficientScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Authorized,
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AccessDecision::Authorized)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub struct AccessChecker {
    tokens: Arc<dyn TokenStore>,
    allow_insecure_request_debug: bool,
    store_timeout: Duration,
}

impl AccessChecker {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            tokens,
            allow_insecure_request_debug: false,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Accept requests over plain HTTP. For local testing only.
    pub fn with_insecure_request_debug(mut self, allow: bool) -> Self {
        self.allow_insecure_request_debug = allow;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Decide whether `bearer` grants every scope in `required`.
    ///
    /// Store failures other than an unknown token are returned as errors so they are
    /// not mistaken for a denial.
    pub async fn check_access(
        &self,
        bearer: Option<&str>,
        required: &Scope,
        transport_is_secure: bool,
    ) -> Result<AccessDecision, OAuthError> {
        if !transport_is_secure && !self.allow_insecure_request_debug {
            return Ok(self.deny(DenialReason::InsecureTransport));
        }
        let Some(token) = bearer.filter(|t| !t.is_empty()) else {
            return Ok(self.deny(DenialReason::MissingToken));
        };

        // Refresh tokens and codes are not bearer credentials.
        match bounded(self.store_timeout, "tokens.get", self.tokens.get(token)).await {
            Ok(Some(record)) if record.kind == TokenKind::AccessToken => {}
            Ok(_) => return Ok(self.deny(DenialReason::InvalidToken)),
            Err(e) => {
                tracing::error!(error = %e, "access check failed");
                return Err(e.into());
            }
        }

        match bounded(
            self.store_timeout,
            "tokens.has_access",
            self.tokens.has_access(token, required),
        )
        .await
        {
            Ok(true) => Ok(AccessDecision::Authorized),
            Ok(false) => Ok(self.deny(DenialReason::InsufficientScope)),
            Err(StorageError::NotFound(_)) => Ok(self.deny(DenialReason::InvalidToken)),
            Err(e) => {
                tracing::error!(error = %e, "access check failed");
                Err(e.into())
            }
        }
    }

    fn deny(&self, reason: DenialReason) -> AccessDecision {
        tracing::debug!(?reason, "access denied");
        AccessDecision::Denied(reason)
    }
}

/// Render a denial. Invalid and under-scoped tokens produce identical responses.
pub fn denial_response(reason: DenialReason) -> EndpointResponse {
    match reason {
        DenialReason::InsecureTransport => EndpointResponse::error(
            &OAuthError::InvalidRequest("Requests must use a secure transport".to_string()),
            None,
        ),
        DenialReason::MissingToken => {
            let mut response = EndpointResponse::new(StatusCode::UNAUTHORIZED);
            response
                .headers
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        }
        DenialReason::InvalidToken | DenialReason::InsufficientScope => {
            let mut response = EndpointResponse::json(
                StatusCode::UNAUTHORIZED,
                &OAuthErrorResponse {
                    error: "invalid_token".to_string(),
                    error_description: None,
                    state: None,
                },
            );
            response.headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
            response
        }
    }
}
