//! OAuth 2.0 data model: clients, token records, pending authorizations and wire bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::errors::{OAuthError, StorageError};
use crate::oauth::scope::Scope;

/// OAuth 2.0 Grant Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
    Implicit,
}

impl GrantType {
    pub const ALL: [GrantType; 4] = [
        GrantType::AuthorizationCode,
        GrantType::RefreshToken,
        GrantType::ClientCredentials,
        GrantType::Implicit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Implicit => "implicit",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "implicit" => Ok(GrantType::Implicit),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth 2.0 Response Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
        }
    }

    /// The grant a client must be authorized for to use this response type.
    pub fn grant_type(&self) -> GrantType {
        match self {
            ResponseType::Code => GrantType::AuthorizationCode,
            ResponseType::Token => GrantType::Implicit,
        }
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "code" => Ok(ResponseType::Code),
            "token" => Ok(ResponseType::Token),
            other => Err(other.to_string()),
        }
    }
}

/// Token types issued by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Bearer => "Bearer",
        }
    }
}

/// How a client proves its identity at the token endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// Identified by `client_id` alone
    Public,
    /// Must present a shared secret
    Confidential { secret: String },
}

impl fmt::Debug for ClientAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientAuthMode::Public => f.write_str("Public"),
            ClientAuthMode::Confidential { .. } => f.write_str("Confidential { secret: *** }"),
        }
    }
}

/// A registered OAuth client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier
    pub id: String,
    /// Display name shown on the consent page
    pub name: String,
    /// Registered redirect URIs, in preference order
    pub redirect_uris: Vec<String>,
    /// Grant types this client may use
    pub authorized_grant_types: Vec<GrantType>,
    pub auth_mode: ClientAuthMode,
    /// Upper bound on what the client may request; `None` leaves only the server vocabulary
    pub allowed_scope: Option<Scope>,
}

impl Client {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        redirect_uris: Vec<String>,
        authorized_grant_types: Vec<GrantType>,
        auth_mode: ClientAuthMode,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            redirect_uris,
            authorized_grant_types,
            auth_mode,
            allowed_scope: None,
        }
    }

    pub fn with_allowed_scope(mut self, scope: Scope) -> Self {
        self.allowed_scope = Some(scope);
        self
    }

    pub fn is_confidential(&self) -> bool {
        matches!(self.auth_mode, ClientAuthMode::Confidential { .. })
    }

    pub fn is_grant_authorized(&self, grant_type: GrantType) -> bool {
        self.authorized_grant_types.contains(&grant_type)
    }

    /// Resolve the redirect URI for an authorize request.
    ///
    /// A supplied URI must match a registered one exactly. Without one, the sole
    /// registered URI is used; a client with several registered URIs must name one.
    pub fn resolve_redirect_uri(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some(uri) => self
                .redirect_uris
                .iter()
                .find(|registered| registered.as_str() == uri)
                .cloned(),
            None if self.redirect_uris.len() == 1 => self.redirect_uris.first().cloned(),
            None => None,
        }
    }

    /// Registration-time checks.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.id.is_empty() {
            return Err(StorageError::InvalidArgument(
                "Client id must not be empty".to_string(),
            ));
        }
        let needs_redirect = self.is_grant_authorized(GrantType::AuthorizationCode)
            || self.is_grant_authorized(GrantType::Implicit);
        if needs_redirect && self.redirect_uris.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "Client '{}' uses a redirect-based grant but has no redirect URI",
                self.id
            )));
        }
        for uri in &self.redirect_uris {
            let parsed = Url::parse(uri).map_err(|e| {
                StorageError::InvalidArgument(format!("Redirect URI '{}' is invalid: {}", uri, e))
            })?;
            if parsed.cannot_be_a_base() || parsed.fragment().is_some() {
                return Err(StorageError::InvalidArgument(format!(
                    "Redirect URI '{}' must be absolute and carry no fragment",
                    uri
                )));
            }
        }
        Ok(())
    }
}

/// What a stored token string stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenKind {
    /// Single-use code; remembers the redirect URI it was issued for, if the request named one
    AuthorizationCode { redirect_uri: Option<String> },
    AccessToken,
    RefreshToken,
}

/// A stored token record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub kind: TokenKind,
    pub client_id: String,
    pub scope: Scope,
    /// Owner-defined payload carried from the consent step
    pub additional_data: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Shared by every token descending from one code redemption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
}

impl TokenRecord {
    pub fn new(kind: TokenKind, client_id: impl Into<String>, scope: Scope) -> Self {
        Self {
            kind,
            client_id: client_id.into(),
            scope,
            additional_data: None,
            expires_at: None,
            grant_id: None,
        }
    }

    pub fn with_additional_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.additional_data = data;
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_grant_id(mut self, grant_id: Option<String>) -> Self {
        self.grant_id = grant_id;
        self
    }

    /// A record whose expiry is at or before `now` is expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// An authorize request that passed validation and awaits the owner's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub response_type: ResponseType,
    pub scope: Scope,
    /// The effective redirect URI, always verified against the client
    pub redirect_uri: String,
    /// Whether the client supplied `redirect_uri` itself
    pub redirect_uri_supplied: bool,
    pub state: Option<String>,
}

/// Client credentials as presented at the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Token Response (RFC 6749 Section 5.1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Omitted when the granted scope equals the requested scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth Error Response (RFC 6749 Section 5.2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl OAuthErrorResponse {
    pub fn from_error(error: &OAuthError, state: Option<String>) -> Self {
        let description = error.description();
        Self {
            error: error.error_code().to_string(),
            error_description: (!description.is_empty()).then(|| description.to_string()),
            state,
        }
    }
}
