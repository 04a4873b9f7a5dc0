//! Standardized error types following the `error-tokengate-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-tokengate-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when HTTP_PORT cannot be parsed
    #[error("error-tokengate-config-2 Parsing HTTP_PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-tokengate-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-tokengate-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-tokengate-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when the refresh token policy is not recognized
    #[error("error-tokengate-config-6 Unknown refresh token policy '{0}': expected static or rotate")]
    RefreshTokenPolicyInvalid(String),

    /// Error when a grant type tag is not recognized
    #[error("error-tokengate-config-7 Unknown grant type '{0}'")]
    GrantTypeInvalid(String),

    /// Error when the configured scope vocabulary is malformed
    #[error("error-tokengate-config-8 Invalid supported scopes: {0}")]
    InvalidScope(String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error when template rendering fails
    #[error("error-tokengate-http-1 Template rendering failed: {0}")]
    TemplateRenderingFailed(String),
}

/// OAuth 2.0 errors, one variant per RFC 6749 error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    /// The request is missing a parameter or is otherwise malformed
    #[error("error-tokengate-oauth-1 Invalid request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed or the client is unknown
    #[error("error-tokengate-oauth-2 Invalid client: {0}")]
    InvalidClient(String),

    /// The grant (code or refresh token) is invalid, expired, or revoked
    #[error("error-tokengate-oauth-3 Invalid grant: {0}")]
    InvalidGrant(String),

    /// The client is not allowed to use this grant type
    #[error("error-tokengate-oauth-4 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// The grant type is not supported by the server
    #[error("error-tokengate-oauth-5 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// The response type is not supported for this client
    #[error("error-tokengate-oauth-6 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// The requested scope is invalid, unknown, or exceeds what was granted
    #[error("error-tokengate-oauth-7 Invalid scope: {0}")]
    InvalidScope(String),

    /// The resource owner denied the request
    #[error("error-tokengate-oauth-8 Access denied: {0}")]
    AccessDenied(String),

    /// The server hit an unexpected condition
    #[error("error-tokengate-oauth-9 Server error: {0}")]
    ServerError(String),

    /// The server is temporarily unable to handle the request
    #[error("error-tokengate-oauth-10 Temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

impl OAuthError {
    /// The exact RFC 6749 error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::ServerError(_) => "server_error",
            OAuthError::TemporarilyUnavailable(_) => "temporarily_unavailable",
        }
    }

    /// Human-readable description without the error code prefix.
    pub fn description(&self) -> &str {
        match self {
            OAuthError::InvalidRequest(d)
            | OAuthError::InvalidClient(d)
            | OAuthError::InvalidGrant(d)
            | OAuthError::UnauthorizedClient(d)
            | OAuthError::UnsupportedGrantType(d)
            | OAuthError::UnsupportedResponseType(d)
            | OAuthError::InvalidScope(d)
            | OAuthError::AccessDenied(d)
            | OAuthError::ServerError(d)
            | OAuthError::TemporarilyUnavailable(d) => d,
        }
    }

    /// HTTP status used when the error is rendered directly.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OAuthError::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<StorageError> for OAuthError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            OAuthError::TemporarilyUnavailable(err.to_string())
        } else {
            OAuthError::ServerError(err.to_string())
        }
    }
}

/// Storage-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested key does not exist or has expired
    #[error("error-tokengate-storage-1 Not found: {0}")]
    NotFound(String),

    /// A record with the same key already exists
    #[error("error-tokengate-storage-2 Already exists: {0}")]
    AlreadyExists(String),

    /// The key or record was rejected
    #[error("error-tokengate-storage-3 Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store did not answer within the configured bound
    #[error("error-tokengate-storage-4 Operation timed out: {0}")]
    Timeout(String),

    /// Backend connection failed
    #[error("error-tokengate-storage-5 Connection failed: {0}")]
    ConnectionFailed(String),

    /// An in-process lock was poisoned by a panicking holder
    #[error("error-tokengate-storage-6 Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Backend query failed
    #[error("error-tokengate-storage-7 Query failed: {0}")]
    QueryFailed(String),
}

impl StorageError {
    /// Transient failures are safe for the caller to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout(_) | StorageError::ConnectionFailed(_)
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "internal server error");
        (StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}
