//! The grant-flow state machine and token lifecycle.
//!
//! [`GrantEngine`] holds no state of its own. It coordinates the client registry, the
//! token store, the pending-authorization store and a token factory, all injected at
//! construction. Every store call is bounded by [`EngineConfig::store_timeout`].
//!
//! Authorization-code flow per request:
//!
//! ```text
//! Requested --validate_authorization--> Staged --grant--> Granted (code or implicit token)
//!                                          |----deny---> Denied (access_denied redirect)
//!                                          '----TTL----> Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::errors::{OAuthError, StorageError};
use crate::oauth::response::AuthorizationRedirect;
use crate::oauth::scope::Scope;
use crate::oauth::token_factory::TokenFactory;
use crate::oauth::types::{
    Client, ClientAuthMode, ClientCredentials, GrantType, PendingAuthorization, ResponseType,
    TokenKind, TokenRecord, TokenResponse, TokenType,
};
use crate::storage::{ClientRegistry, PendingAuthorizationStore, TokenStore, bounded};

const MAX_ISSUE_ATTEMPTS: usize = 3;

/// What happens to a refresh token when it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenPolicy {
    /// The refresh token stays valid and is reused
    Static,
    /// The used refresh token is revoked and a new one issued with each refresh
    Rotate,
}

impl FromStr for RefreshTokenPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "static" => Ok(RefreshTokenPolicy::Static),
            "rotate" => Ok(RefreshTokenPolicy::Rotate),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RefreshTokenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTokenPolicy::Static => f.write_str("static"),
            RefreshTokenPolicy::Rotate => f.write_str("rotate"),
        }
    }
}

/// Engine tuning. The refresh policy has no default and must be chosen explicitly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub refresh_token_policy: RefreshTokenPolicy,
    /// `None` issues access tokens that never expire
    pub access_token_lifetime: Option<Duration>,
    pub authorization_code_lifetime: Duration,
    /// `None` issues refresh tokens that never expire
    pub refresh_token_lifetime: Option<Duration>,
    pub pending_authorization_lifetime: Duration,
    /// Upper bound on how long a redeemed code is remembered for replay detection
    pub redemption_retention: Duration,
    pub store_timeout: std::time::Duration,
    pub enabled_grant_types: Vec<GrantType>,
    /// Server-wide scope vocabulary; `None` accepts any well-formed scope token
    pub supported_scopes: Option<Scope>,
}

impl EngineConfig {
    pub fn new(refresh_token_policy: RefreshTokenPolicy) -> Self {
        Self {
            refresh_token_policy,
            access_token_lifetime: Some(Duration::hours(1)),
            authorization_code_lifetime: Duration::seconds(30),
            refresh_token_lifetime: None,
            pending_authorization_lifetime: Duration::minutes(5),
            redemption_retention: Duration::days(1),
            store_timeout: std::time::Duration::from_secs(5),
            enabled_grant_types: GrantType::ALL.to_vec(),
            supported_scopes: None,
        }
    }

    pub fn with_access_token_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.access_token_lifetime = lifetime;
        self
    }

    pub fn with_authorization_code_lifetime(mut self, lifetime: Duration) -> Self {
        self.authorization_code_lifetime = lifetime;
        self
    }

    pub fn with_refresh_token_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.refresh_token_lifetime = lifetime;
        self
    }

    pub fn with_pending_authorization_lifetime(mut self, lifetime: Duration) -> Self {
        self.pending_authorization_lifetime = lifetime;
        self
    }

    pub fn with_redemption_retention(mut self, retention: Duration) -> Self {
        self.redemption_retention = retention;
        self
    }

    pub fn with_store_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_enabled_grant_types(mut self, grant_types: Vec<GrantType>) -> Self {
        self.enabled_grant_types = grant_types;
        self
    }

    pub fn with_supported_scopes(mut self, scopes: Option<Scope>) -> Self {
        self.supported_scopes = scopes;
        self
    }

    pub fn is_grant_enabled(&self, grant_type: GrantType) -> bool {
        self.enabled_grant_types.contains(&grant_type)
    }
}

/// Raw authorize request parameters as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// An authorize request that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    pub client: Client,
    pub pending: PendingAuthorization,
}

/// Why an authorize request was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizeRejection {
    /// Found before the redirect URI was verified; must never become a redirect
    Direct(OAuthError),
    /// Found after the redirect URI was verified; delivered to the client
    Redirect {
        error: OAuthError,
        redirect: AuthorizationRedirect,
    },
}

impl AuthorizeRejection {
    pub fn error(&self) -> &OAuthError {
        match self {
            AuthorizeRejection::Direct(error) => error,
            AuthorizeRejection::Redirect { error, .. } => error,
        }
    }
}

/// Coordinates the stores to run the four grant types.
pub struct GrantEngine {
    clients: Arc<dyn ClientRegistry>,
    tokens: Arc<dyn TokenStore>,
    pending: Arc<dyn PendingAuthorizationStore>,
    token_factory: Arc<dyn TokenFactory>,
    config: EngineConfig,
}

impl GrantEngine {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        tokens: Arc<dyn TokenStore>,
        pending: Arc<dyn PendingAuthorizationStore>,
        token_factory: Arc<dyn TokenFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            clients,
            tokens,
            pending,
            token_factory,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<dyn ClientRegistry> {
        &self.clients
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    // ===== Authorization endpoint: Requested -> Staged -> Granted | Denied =====

    /// Validate an authorize request. First failure wins, in this order: client,
    /// redirect URI, response type, scope.
    pub async fn validate_authorization(
        &self,
        request: AuthorizationRequest,
    ) -> Result<ValidatedAuthorization, AuthorizeRejection> {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthorizeRejection::Direct(OAuthError::InvalidRequest(
                    "Missing client_id parameter".to_string(),
                ))
            })?;

        let client = self
            .load_client(client_id)
            .await
            .map_err(AuthorizeRejection::Direct)?;

        let redirect_uri = client
            .resolve_redirect_uri(request.redirect_uri.as_deref())
            .ok_or_else(|| {
                tracing::debug!(client_id = %client.id, "redirect_uri mismatch");
                AuthorizeRejection::Direct(OAuthError::InvalidRequest(
                    "redirect_uri does not match a registered redirect URI".to_string(),
                ))
            })?;

        let state = request.state.clone();
        let reject = |error: OAuthError, use_fragment: bool| {
            tracing::debug!(client_id = %client.id, error = %error, "authorize request rejected");
            AuthorizeRejection::Redirect {
                redirect: AuthorizationRedirect::error(
                    redirect_uri.clone(),
                    &error,
                    state.as_deref(),
                    use_fragment,
                ),
                error,
            }
        };

        let response_type = match request.response_type.as_deref() {
            None | Some("") => {
                return Err(reject(
                    OAuthError::InvalidRequest("Missing response_type parameter".to_string()),
                    false,
                ));
            }
            Some(value) => value.parse::<ResponseType>().map_err(|value| {
                reject(
                    OAuthError::UnsupportedResponseType(format!(
                        "Response type '{}' is not supported",
                        value
                    )),
                    false,
                )
            })?,
        };
        let use_fragment = response_type == ResponseType::Token;

        let grant_type = response_type.grant_type();
        if !self.config.is_grant_enabled(grant_type) || !client.is_grant_authorized(grant_type) {
            return Err(reject(
                OAuthError::UnsupportedResponseType(format!(
                    "Response type '{}' is not allowed for this client",
                    response_type.as_str()
                )),
                use_fragment,
            ));
        }

        let requested = Scope::parse_optional(request.scope.as_deref())
            .map_err(|e| reject(e, use_fragment))?
            .filter(|scope| !scope.is_empty());
        let scope = self
            .permitted_scope(&client, requested)
            .map_err(|e| reject(e, use_fragment))?;

        Ok(ValidatedAuthorization {
            pending: PendingAuthorization {
                client_id: client.id.clone(),
                response_type,
                scope,
                redirect_uri,
                redirect_uri_supplied: request.redirect_uri.is_some(),
                state: request.state,
            },
            client,
        })
    }

    /// Persist a validated request under a fresh data key with the pending TTL.
    pub async fn stage(&self, validated: &ValidatedAuthorization) -> Result<String, OAuthError> {
        let data_key = self.token_factory.new_token();
        let expires_at = Utc::now() + self.config.pending_authorization_lifetime;
        self.call(
            "pending.put",
            self.pending
                .put(&data_key, validated.pending.clone(), Some(expires_at)),
        )
        .await?;
        tracing::debug!(client_id = %validated.client.id, "authorization staged");
        Ok(data_key)
    }

    /// Drop a staged request without producing a redirect.
    pub async fn discard(&self, data_key: &str) -> Result<(), OAuthError> {
        match self.call("pending.pop", self.pending.pop(data_key)).await {
            Ok(_) | Err(OAuthError::InvalidRequest(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Confirm a staged request: issue a code (or an implicit access token) and
    /// build the redirect that delivers it.
    pub async fn grant(
        &self,
        data_key: &str,
        additional_data: Option<serde_json::Value>,
    ) -> Result<AuthorizationRedirect, OAuthError> {
        let pending = self.pop_pending(data_key).await?;
        let now = Utc::now();

        match pending.response_type {
            ResponseType::Code => {
                let kind = TokenKind::AuthorizationCode {
                    redirect_uri: pending
                        .redirect_uri_supplied
                        .then(|| pending.redirect_uri.clone()),
                };
                let record = TokenRecord::new(kind, &pending.client_id, pending.scope.clone())
                    .with_additional_data(additional_data)
                    .with_expires_at(Some(now + self.config.authorization_code_lifetime));
                let code = self.issue(record).await?;
                tracing::info!(client_id = %pending.client_id, "authorization code issued");
                Ok(AuthorizationRedirect::new(pending.redirect_uri, false)
                    .with_param("code", code)
                    .with_optional_param("state", pending.state.as_deref()))
            }
            ResponseType::Token => {
                let expires_at = self.config.access_token_lifetime.map(|d| now + d);
                let record = TokenRecord::new(
                    TokenKind::AccessToken,
                    &pending.client_id,
                    pending.scope.clone(),
                )
                .with_additional_data(additional_data)
                .with_expires_at(expires_at);
                let access_token = self.issue(record).await?;
                tracing::info!(client_id = %pending.client_id, "implicit access token issued");
                Ok(AuthorizationRedirect::new(pending.redirect_uri, true)
                    .with_param("access_token", access_token)
                    .with_param("token_type", TokenType::Bearer.as_str())
                    .with_optional_param(
                        "expires_in",
                        self.config
                            .access_token_lifetime
                            .map(|d| d.num_seconds().to_string())
                            .as_deref(),
                    )
                    .with_optional_param("state", pending.state.as_deref()))
            }
        }
    }

    /// Refuse a staged request on the owner's behalf.
    pub async fn deny(&self, data_key: &str) -> Result<AuthorizationRedirect, OAuthError> {
        let pending = self.pop_pending(data_key).await?;
        tracing::info!(client_id = %pending.client_id, "authorization denied by resource owner");
        Ok(AuthorizationRedirect::error(
            pending.redirect_uri,
            &OAuthError::AccessDenied(String::new()),
            pending.state.as_deref(),
            pending.response_type == ResponseType::Token,
        ))
    }

    async fn pop_pending(&self, data_key: &str) -> Result<PendingAuthorization, OAuthError> {
        self.call("pending.pop", self.pending.pop(data_key))
            .await
            .map_err(|e| match e {
                OAuthError::InvalidRequest(_) => OAuthError::InvalidRequest(
                    "Authorization request is unknown or has expired".to_string(),
                ),
                other => other,
            })
    }

    // ===== Token endpoint grants =====

    /// Exchange an authorization code (RFC 6749 Section 4.1.3).
    pub async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        self.ensure_enabled(GrantType::AuthorizationCode)?;
        let client = self.authenticate_client(credentials).await?;
        if !client.is_grant_authorized(GrantType::AuthorizationCode) {
            return Err(OAuthError::UnauthorizedClient(
                "Client may not use the authorization_code grant".to_string(),
            ));
        }

        let Some(record) = self.call("tokens.get", self.tokens.get(code)).await? else {
            return Err(self.reject_code_replay(code, &client).await?);
        };

        let TokenKind::AuthorizationCode {
            redirect_uri: ref issued_for,
        } = record.kind
        else {
            return Err(OAuthError::InvalidGrant(
                "Authorization code is invalid".to_string(),
            ));
        };
        if record.client_id != client.id {
            tracing::warn!(
                client_id = %client.id,
                security_event = "code_client_mismatch",
                "authorization code presented by a different client"
            );
            return Err(OAuthError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }
        if let Some(issued_for) = issued_for {
            if redirect_uri != Some(issued_for.as_str()) {
                return Err(OAuthError::InvalidGrant(
                    "redirect_uri does not match the authorization request".to_string(),
                ));
            }
        }

        // Compare-and-delete: of two concurrent exchanges only one removes the code.
        if self.call("tokens.take", self.tokens.take(code)).await?.is_none() {
            tracing::warn!(
                client_id = %client.id,
                security_event = "code_replay",
                "authorization code redeemed concurrently"
            );
            return Err(OAuthError::InvalidGrant(
                "Authorization code has already been used".to_string(),
            ));
        }

        let now = Utc::now();
        let grant_id = Uuid::new_v4().to_string();
        let (access_token, access_expires) = self
            .issue_access_token(
                &client.id,
                &record.scope,
                &record.additional_data,
                Some(&grant_id),
                now,
            )
            .await?;

        let refresh_token = if client.is_grant_authorized(GrantType::RefreshToken)
            && self.config.is_grant_enabled(GrantType::RefreshToken)
        {
            Some(
                self.issue_refresh_token(
                    &client.id,
                    &record.scope,
                    &record.additional_data,
                    Some(&grant_id),
                    now,
                )
                .await?,
            )
        } else {
            None
        };

        // Kept while any token of the grant can still be live, never past the retention.
        let live_until = match (&refresh_token, self.config.refresh_token_lifetime) {
            (Some(_), None) => None,
            (Some(_), Some(lifetime)) => access_expires.map(|a| a.max(now + lifetime)),
            (None, _) => access_expires,
        };
        let horizon = now + self.config.redemption_retention;
        let redemption_expires = live_until.map_or(horizon, |t| t.min(horizon));
        self.call(
            "tokens.record_redemption",
            self.tokens
                .record_redemption(code, &grant_id, Some(redemption_expires)),
        )
        .await?;

        tracing::info!(client_id = %client.id, grant_type = "authorization_code", "tokens issued");
        Ok(self.token_response(access_token, refresh_token, None))
    }

    /// A code that is absent may have been redeemed before: if so, revoke
    /// every token of the grant it started, including ones minted by refresh.
    async fn reject_code_replay(
        &self,
        code: &str,
        client: &Client,
    ) -> Result<OAuthError, OAuthError> {
        if let Some(grant_id) = self
            .call("tokens.take_redemption", self.tokens.take_redemption(code))
            .await?
        {
            let revoked = self
                .call("tokens.revoke_grant", self.tokens.revoke_grant(&grant_id))
                .await?;
            tracing::warn!(
                client_id = %client.id,
                revoked,
                security_event = "code_replay",
                "authorization code reused; revoked tokens of its grant"
            );
            return Ok(OAuthError::InvalidGrant(
                "Authorization code has already been used".to_string(),
            ));
        }
        Ok(OAuthError::InvalidGrant(
            "Authorization code is invalid or expired".to_string(),
        ))
    }

    /// Refresh an access token (RFC 6749 Section 6).
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
        requested: Option<Scope>,
    ) -> Result<TokenResponse, OAuthError> {
        self.ensure_enabled(GrantType::RefreshToken)?;
        let client = self.authenticate_client(credentials).await?;
        if !client.is_grant_authorized(GrantType::RefreshToken) {
            return Err(OAuthError::UnauthorizedClient(
                "Client may not use the refresh_token grant".to_string(),
            ));
        }

        let record = match self.call("tokens.get", self.tokens.get(refresh_token)).await? {
            Some(record) if record.kind == TokenKind::RefreshToken => record,
            _ => {
                return Err(OAuthError::InvalidGrant(
                    "Refresh token is invalid or expired".to_string(),
                ));
            }
        };
        if record.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was issued to another client".to_string(),
            ));
        }

        let granted = match &requested {
            Some(scope) if !scope.is_subset_of(&record.scope) => {
                return Err(OAuthError::InvalidScope(format!(
                    "Requested scope exceeds the original grant: {}",
                    scope.missing_from(&record.scope).join(" ")
                )));
            }
            Some(scope) => scope.clone(),
            None => record.scope.clone(),
        };

        let now = Utc::now();
        let rotated = match self.config.refresh_token_policy {
            RefreshTokenPolicy::Static => None,
            RefreshTokenPolicy::Rotate => {
                if self
                    .call("tokens.take", self.tokens.take(refresh_token))
                    .await?
                    .is_none()
                {
                    tracing::warn!(
                        client_id = %client.id,
                        security_event = "refresh_token_reuse",
                        "rotated refresh token used concurrently"
                    );
                    return Err(OAuthError::InvalidGrant(
                        "Refresh token has already been used".to_string(),
                    ));
                }
                Some(
                    self.issue_refresh_token(
                        &client.id,
                        &record.scope,
                        &record.additional_data,
                        record.grant_id.as_deref(),
                        now,
                    )
                    .await?,
                )
            }
        };

        let (access_token, _) = self
            .issue_access_token(
                &client.id,
                &granted,
                &record.additional_data,
                record.grant_id.as_deref(),
                now,
            )
            .await?;

        tracing::info!(
            client_id = %client.id,
            grant_type = "refresh_token",
            rotated = rotated.is_some(),
            "tokens issued"
        );
        let scope = match &requested {
            Some(scope) if *scope != granted => Some(granted.to_string()),
            _ => None,
        };
        Ok(self.token_response(
            access_token,
            Some(rotated.unwrap_or_else(|| refresh_token.to_string())),
            scope,
        ))
    }

    /// Client credentials grant (RFC 6749 Section 4.4). Confidential clients only.
    pub async fn client_credentials(
        &self,
        credentials: &ClientCredentials,
        requested: Option<Scope>,
    ) -> Result<TokenResponse, OAuthError> {
        self.ensure_enabled(GrantType::ClientCredentials)?;
        let client = self.load_client(&credentials.client_id).await?;
        if !client.is_confidential() {
            return Err(OAuthError::UnauthorizedClient(
                "Public clients may not use the client_credentials grant".to_string(),
            ));
        }
        verify_secret(&client, credentials.client_secret.as_deref())?;
        if !client.is_grant_authorized(GrantType::ClientCredentials) {
            return Err(OAuthError::UnauthorizedClient(
                "Client may not use the client_credentials grant".to_string(),
            ));
        }

        let defaulted = requested.is_none();
        let granted = self.permitted_scope(&client, requested)?;
        let (access_token, _) = self
            .issue_access_token(&client.id, &granted, &None, None, Utc::now())
            .await?;

        tracing::info!(client_id = %client.id, grant_type = "client_credentials", "tokens issued");
        Ok(self.token_response(access_token, None, defaulted.then(|| granted.to_string())))
    }

    /// Revoke an access or refresh token held by the authenticated client (RFC 7009).
    /// Unknown tokens are not an error.
    pub async fn revoke(
        &self,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<(), OAuthError> {
        let client = self.authenticate_client(credentials).await?;
        let Some(record) = self.call("tokens.get", self.tokens.get(token)).await? else {
            return Ok(());
        };
        if record.client_id != client.id {
            return Err(OAuthError::InvalidRequest(
                "Token was not issued to this client".to_string(),
            ));
        }
        if matches!(record.kind, TokenKind::AuthorizationCode { .. }) {
            return Err(OAuthError::InvalidRequest(
                "Authorization codes cannot be revoked".to_string(),
            ));
        }
        self.call("tokens.revoke", self.tokens.revoke(token)).await?;
        tracing::info!(client_id = %client.id, "token revoked");
        Ok(())
    }

    // ===== Helpers =====

    fn ensure_enabled(&self, grant_type: GrantType) -> Result<(), OAuthError> {
        if self.config.is_grant_enabled(grant_type) {
            Ok(())
        } else {
            Err(OAuthError::UnsupportedGrantType(format!(
                "Grant type '{}' is not enabled",
                grant_type
            )))
        }
    }

    async fn load_client(&self, client_id: &str) -> Result<Client, OAuthError> {
        bounded(
            self.config.store_timeout,
            "clients.get",
            self.clients.get(client_id),
        )
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => {
                tracing::debug!(client_id, "unknown client");
                OAuthError::InvalidClient("Unknown client".to_string())
            }
            other => other.into(),
        })
    }

    async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<Client, OAuthError> {
        let client = self.load_client(&credentials.client_id).await?;
        verify_secret(&client, credentials.client_secret.as_deref())?;
        Ok(client)
    }

    /// Check a requested scope against the server vocabulary and the client's
    /// permitted scope. Without a request, the client's permitted scope is granted.
    fn permitted_scope(&self, client: &Client, requested: Option<Scope>) -> Result<Scope, OAuthError> {
        let scope = match (requested, &client.allowed_scope) {
            (Some(scope), _) => scope,
            (None, Some(allowed)) if !allowed.is_empty() => allowed.clone(),
            (None, _) => {
                return Err(OAuthError::InvalidScope(
                    "No scope requested and the client has no default scope".to_string(),
                ));
            }
        };
        if let Some(supported) = &self.config.supported_scopes {
            if !scope.is_subset_of(supported) {
                return Err(OAuthError::InvalidScope(format!(
                    "Unsupported scope: {}",
                    scope.missing_from(supported).join(" ")
                )));
            }
        }
        if let Some(allowed) = &client.allowed_scope {
            if !scope.is_subset_of(allowed) {
                return Err(OAuthError::InvalidScope(format!(
                    "Scope not permitted for this client: {}",
                    scope.missing_from(allowed).join(" ")
                )));
            }
        }
        Ok(scope)
    }

    async fn issue_access_token(
        &self,
        client_id: &str,
        scope: &Scope,
        additional_data: &Option<serde_json::Value>,
        grant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(String, Option<DateTime<Utc>>), OAuthError> {
        let expires_at = self.config.access_token_lifetime.map(|d| now + d);
        let record = TokenRecord::new(TokenKind::AccessToken, client_id, scope.clone())
            .with_additional_data(additional_data.clone())
            .with_expires_at(expires_at)
            .with_grant_id(grant_id.map(str::to_string));
        Ok((self.issue(record).await?, expires_at))
    }

    async fn issue_refresh_token(
        &self,
        client_id: &str,
        scope: &Scope,
        additional_data: &Option<serde_json::Value>,
        grant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, OAuthError> {
        let record = TokenRecord::new(TokenKind::RefreshToken, client_id, scope.clone())
            .with_additional_data(additional_data.clone())
            .with_expires_at(self.config.refresh_token_lifetime.map(|d| now + d))
            .with_grant_id(grant_id.map(str::to_string));
        self.issue(record).await
    }

    /// Store `record` under a fresh key that is not currently in use.
    async fn issue(&self, record: TokenRecord) -> Result<String, OAuthError> {
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let token = self.token_factory.new_token();
            if self.call("tokens.contains", self.tokens.contains(&token)).await? {
                tracing::warn!("token factory produced a key already in use");
                continue;
            }
            self.call("tokens.store", self.tokens.store(&token, record))
                .await?;
            return Ok(token);
        }
        Err(OAuthError::ServerError(
            "Unable to generate a unique token".to_string(),
        ))
    }

    fn token_response(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        scope: Option<String>,
    ) -> TokenResponse {
        TokenResponse {
            access_token,
            token_type: TokenType::Bearer.as_str().to_string(),
            expires_in: self.config.access_token_lifetime.map(|d| d.num_seconds()),
            refresh_token,
            scope,
        }
    }

    /// Bound a store call and map its failure. `NotFound` becomes `InvalidRequest`;
    /// callers that need a different code remap it.
    async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = crate::storage::Result<T>>,
    ) -> Result<T, OAuthError> {
        bounded(self.config.store_timeout, operation, fut)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(d) => OAuthError::InvalidRequest(d),
                other => {
                    tracing::error!(operation, error = %other, "store operation failed");
                    other.into()
                }
            })
    }
}

/// Public clients need no secret. Confidential clients must present theirs.
fn verify_secret(client: &Client, presented: Option<&str>) -> Result<(), OAuthError> {
    match &client.auth_mode {
        ClientAuthMode::Public => Ok(()),
        ClientAuthMode::Confidential { secret } => {
            let presented = presented.ok_or_else(|| {
                OAuthError::InvalidClient("Missing client secret".to_string())
            })?;
            if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
                Ok(())
            } else {
                tracing::debug!(client_id = %client.id, "client secret mismatch");
                Err(OAuthError::InvalidClient(
                    "Invalid client credentials".to_string(),
                ))
            }
        }
    }
}
