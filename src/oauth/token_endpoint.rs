//! Token endpoint logic (RFC 6749 Section 3.2) and token revocation (RFC 7009).

use base64::{Engine, prelude::BASE64_STANDARD};
use http::{HeaderValue, StatusCode, header};
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::grant_engine::GrantEngine;
use crate::oauth::response::EndpointResponse;
use crate::oauth::scope::Scope;
use crate::oauth::types::{ClientCredentials, GrantType, TokenResponse};

/// Form data for the token endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Form data for the revocation endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevocationForm {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// A token request, one variant per grant the token endpoint accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        scope: Option<Scope>,
    },
    ClientCredentials {
        scope: Option<Scope>,
    },
}

impl TryFrom<&TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: &TokenForm) -> Result<Self, Self::Error> {
        let grant_type = form
            .grant_type
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing grant_type parameter".to_string()))?;
        let scope = || {
            Scope::parse_optional(form.scope.as_deref())
                .map(|scope| scope.filter(|s| !s.is_empty()))
        };

        match grant_type.parse::<GrantType>() {
            Ok(GrantType::AuthorizationCode) => Ok(TokenRequest::AuthorizationCode {
                code: required(&form.code, "code")?,
                redirect_uri: form.redirect_uri.clone(),
            }),
            Ok(GrantType::RefreshToken) => Ok(TokenRequest::RefreshToken {
                refresh_token: required(&form.refresh_token, "refresh_token")?,
                scope: scope()?,
            }),
            Ok(GrantType::ClientCredentials) => {
                Ok(TokenRequest::ClientCredentials { scope: scope()? })
            }
            Ok(GrantType::Implicit) | Err(_) => Err(OAuthError::UnsupportedGrantType(format!(
                "Grant type '{}' is not supported at the token endpoint",
                grant_type
            ))),
        }
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, OAuthError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("Missing {} parameter", name)))
}

/// Extract client credentials from an HTTP Basic `Authorization` header or the form.
///
/// Using both methods at once is rejected. Returns `None` when the request carries no
/// client identification at all.
pub fn extract_client_credentials(
    authorization: Option<&str>,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<Option<ClientCredentials>, OAuthError> {
    let basic = match authorization {
        Some(value) => Some(decode_basic(value)?),
        None => None,
    };

    match basic {
        Some(credentials) => {
            if form_client_secret.is_some() {
                return Err(OAuthError::InvalidRequest(
                    "Client credentials supplied in both header and body".to_string(),
                ));
            }
            if form_client_id.is_some_and(|id| id != credentials.client_id) {
                return Err(OAuthError::InvalidRequest(
                    "client_id does not match the Authorization header".to_string(),
                ));
            }
            Ok(Some(credentials))
        }
        None => Ok(form_client_id
            .filter(|id| !id.is_empty())
            .map(|client_id| ClientCredentials {
                client_id: client_id.to_string(),
                client_secret: form_client_secret.map(str::to_string),
            })),
    }
}

fn decode_basic(value: &str) -> Result<ClientCredentials, OAuthError> {
    let malformed = || OAuthError::InvalidClient("Malformed Basic authorization header".to_string());
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))
        .ok_or_else(malformed)?;
    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|_| malformed())?;
    let credentials = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (client_id, client_secret) = credentials.split_once(':').ok_or_else(malformed)?;
    if client_id.is_empty() {
        return Err(malformed());
    }
    Ok(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: Some(client_secret.to_string()),
    })
}

pub struct TokenEndpoint {
    engine: Arc<GrantEngine>,
}

impl TokenEndpoint {
    pub fn new(engine: Arc<GrantEngine>) -> Self {
        Self { engine }
    }

    /// Handle a token request and render the RFC 6749 JSON body.
    pub async fn handle(&self, authorization: Option<&str>, form: TokenForm) -> EndpointResponse {
        match self.token(authorization, &form).await {
            Ok(response) => EndpointResponse::json(StatusCode::OK, &response),
            Err(error) => error_response(&error, authorization.is_some()),
        }
    }

    /// Dispatch a token request to the matching grant.
    pub async fn token(
        &self,
        authorization: Option<&str>,
        form: &TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        let request = TokenRequest::try_from(form)?;
        let credentials = extract_client_credentials(
            authorization,
            form.client_id.as_deref(),
            form.client_secret.as_deref(),
        )?
        .ok_or_else(|| OAuthError::InvalidClient("Client authentication required".to_string()))?;

        match request {
            TokenRequest::AuthorizationCode { code, redirect_uri } => {
                self.engine
                    .exchange_code(&credentials, &code, redirect_uri.as_deref())
                    .await
            }
            TokenRequest::RefreshToken {
                refresh_token,
                scope,
            } => {
                self.engine
                    .refresh(&credentials, &refresh_token, scope)
                    .await
            }
            TokenRequest::ClientCredentials { scope } => {
                self.engine.client_credentials(&credentials, scope).await
            }
        }
    }

    /// Handle a revocation request. Succeeds with an empty 200 for unknown tokens.
    pub async fn revoke(
        &self,
        authorization: Option<&str>,
        form: RevocationForm,
    ) -> EndpointResponse {
        let result = async {
            let token = required(&form.token, "token")?;
            let credentials = extract_client_credentials(
                authorization,
                form.client_id.as_deref(),
                form.client_secret.as_deref(),
            )?
            .ok_or_else(|| {
                OAuthError::InvalidClient("Client authentication required".to_string())
            })?;
            self.engine.revoke(&credentials, &token).await
        }
        .await;

        match result {
            Ok(()) => EndpointResponse::new(StatusCode::OK),
            Err(error) => error_response(&error, authorization.is_some()),
        }
    }
}

/// A 401 for a client that authenticated via the header must carry `WWW-Authenticate`.
fn error_response(error: &OAuthError, used_header: bool) -> EndpointResponse {
    let mut response = EndpointResponse::error(error, None);
    if used_header && response.status == StatusCode::UNAUTHORIZED {
        response.headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"token\""),
        );
    }
    response
}
