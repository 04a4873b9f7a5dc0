//! Authorization endpoint logic (RFC 6749 Section 3.1).
//!
//! Validates authorize requests, stages them, hands off to a [`ConsentHandler`], and
//! turns the owner's decision into the redirect that carries a code, an implicit
//! token, or an error.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::grant_engine::{AuthorizationRequest, AuthorizeRejection, GrantEngine};
use crate::oauth::response::{AuthorizationRedirect, EndpointResponse};
use crate::oauth::scope::Scope;
use crate::oauth::types::{Client, ResponseType};

/// Everything a consent handler needs to ask the resource owner.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub client: Client,
    pub response_type: ResponseType,
    pub scope: Scope,
    pub redirect_uri: String,
    pub state: Option<String>,
    /// Pass back to [`AuthorizationEndpoint::grant_access`] or [`AuthorizationEndpoint::deny_access`]
    pub data_key: String,
}

/// Obtains the resource owner's decision.
///
/// Called once per staged request. The returned response is shown to the user; the
/// implementation later calls `grant_access` or `deny_access` with the same data key.
/// Returning an error redirects it to the client immediately.
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    async fn on_authenticate(&self, request: &ConsentRequest) -> Result<EndpointResponse, OAuthError>;
}

pub struct AuthorizationEndpoint {
    engine: Arc<GrantEngine>,
    consent: Arc<dyn ConsentHandler>,
}

impl AuthorizationEndpoint {
    pub fn new(engine: Arc<GrantEngine>, consent: Arc<dyn ConsentHandler>) -> Self {
        Self { engine, consent }
    }

    /// Handle an incoming authorize request.
    pub async fn authorize(&self, request: AuthorizationRequest) -> EndpointResponse {
        let validated = match self.engine.validate_authorization(request).await {
            Ok(validated) => validated,
            Err(AuthorizeRejection::Direct(error)) => {
                return EndpointResponse::error(&error, None);
            }
            Err(AuthorizeRejection::Redirect { redirect, .. }) => {
                return EndpointResponse::redirect(&redirect);
            }
        };

        let pending = &validated.pending;
        let use_fragment = pending.response_type == ResponseType::Token;
        let redirect_error = |error: &OAuthError| {
            EndpointResponse::redirect(&AuthorizationRedirect::error(
                pending.redirect_uri.clone(),
                error,
                pending.state.as_deref(),
                use_fragment,
            ))
        };

        let data_key = match self.engine.stage(&validated).await {
            Ok(data_key) => data_key,
            Err(error) => return redirect_error(&error),
        };

        let consent_request = ConsentRequest {
            client: validated.client.clone(),
            response_type: pending.response_type,
            scope: pending.scope.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            state: pending.state.clone(),
            data_key,
        };
        match self.consent.on_authenticate(&consent_request).await {
            Ok(response) => response,
            Err(error) => {
                if let Err(e) = self.engine.discard(&consent_request.data_key).await {
                    tracing::warn!(error = %e, "failed to discard pending authorization");
                }
                tracing::debug!(
                    client_id = %consent_request.client.id,
                    error = %error,
                    "consent handler rejected the request"
                );
                redirect_error(&error)
            }
        }
    }

    /// The owner approved: redirect with a code or an implicit access token.
    /// Failures here cannot be redirected because the staged redirect URI is gone.
    pub async fn grant_access(
        &self,
        data_key: &str,
        additional_data: Option<serde_json::Value>,
    ) -> EndpointResponse {
        match self.engine.grant(data_key, additional_data).await {
            Ok(redirect) => EndpointResponse::redirect(&redirect),
            Err(error) => EndpointResponse::error(&error, None),
        }
    }

    /// The owner refused: redirect with `access_denied`.
    pub async fn deny_access(&self, data_key: &str) -> EndpointResponse {
        match self.engine.deny(data_key).await {
            Ok(redirect) => EndpointResponse::redirect(&redirect),
            Err(error) => EndpointResponse::error(&error, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::grant_engine::{EngineConfig, RefreshTokenPolicy};
    use crate::oauth::token_factory::RandomTokenFactory;
    use crate::oauth::types::{ClientAuthMode, GrantType};
    use crate::storage::{
        ClientRegistry, MemoryClientRegistry, MemoryPendingAuthorizationStore, MemoryTokenStore,
    };
    use http::StatusCode;
    use std::sync::Mutex;

    /// Records the data key and shows an empty page, or refuses everything.
    #[derive(Default)]
    struct RecordingConsent {
        refuse: bool,
        seen: Mutex<Vec<ConsentRequest>>,
    }

    #[async_trait]
    impl ConsentHandler for RecordingConsent {
        async fn on_authenticate(
            &self,
            request: &ConsentRequest,
        ) -> Result<EndpointResponse, OAuthError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            if self.refuse {
                return Err(OAuthError::InvalidScope("Scope not offered".to_string()));
            }
            Ok(EndpointResponse::html(StatusCode::OK, "consent".to_string()))
        }
    }

    impl RecordingConsent {
        fn last_data_key(&self) -> String {
            self.seen.lock().unwrap().last().unwrap().data_key.clone()
        }
    }

    async fn endpoint(refuse: bool) -> (AuthorizationEndpoint, Arc<RecordingConsent>) {
        let clients = Arc::new(MemoryClientRegistry::new());
        clients
            .add(Client::new(
                "A",
                "Client A",
                vec!["https://a.example/cb".to_string()],
                vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
                ClientAuthMode::Public,
            ))
            .await
            .unwrap();
        let engine = Arc::new(GrantEngine::new(
            clients,
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MemoryPendingAuthorizationStore::new()),
            Arc::new(RandomTokenFactory),
            EngineConfig::new(RefreshTokenPolicy::Static),
        ));
        let consent = Arc::new(RecordingConsent {
            refuse,
            ..Default::default()
        });
        (AuthorizationEndpoint::new(engine, consent.clone()), consent)
    }

    fn request(client_id: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code".to_string()),
            client_id: Some(client_id.to_string()),
            redirect_uri: Some("https://a.example/cb".to_string()),
            scope: Some("read".to_string()),
            state: Some("S".to_string()),
        }
    }

    #[tokio::test]
    async fn test_authorize_presents_consent_then_redirects_with_code() {
        let (endpoint, consent) = endpoint(false).await;
        let response = endpoint.authorize(request("A")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"consent");

        let seen = consent.seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(seen.client.id, "A");
        assert_eq!(seen.scope, Scope::parse("read").unwrap());
        assert_eq!(seen.state.as_deref(), Some("S"));

        let response = endpoint.grant_access(&seen.data_key, None).await;
        assert_eq!(response.status, StatusCode::FOUND);
        let location = url::Url::parse(response.location().unwrap()).unwrap();
        let params: Vec<(String, String)> = location.query_pairs().into_owned().collect();
        assert!(params.iter().any(|(k, _)| k == "code"));
        assert!(params.contains(&("state".to_string(), "S".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_client_renders_direct_error() {
        let (endpoint, consent) = endpoint(false).await;
        let response = endpoint.authorize(request("nobody")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(response.location().is_none());
        assert_eq!(response.json_body().unwrap()["error"], "invalid_client");
        assert!(consent.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consent_error_is_redirected_and_unstaged() {
        let (endpoint, consent) = endpoint(true).await;
        let response = endpoint.authorize(request("A")).await;
        assert_eq!(response.status, StatusCode::FOUND);
        let location = response.location().unwrap();
        assert!(location.starts_with("https://a.example/cb?error=invalid_scope"));
        assert!(location.ends_with("state=S"));

        let again = endpoint.grant_access(&consent.last_data_key(), None).await;
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
        assert_eq!(again.json_body().unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_deny_access() {
        let (endpoint, consent) = endpoint(false).await;
        endpoint.authorize(request("A")).await;
        let response = endpoint.deny_access(&consent.last_data_key()).await;
        assert_eq!(
            response.location(),
            Some("https://a.example/cb?error=access_denied&state=S")
        );

        let replay = endpoint.deny_access(&consent.last_data_key()).await;
        assert_eq!(replay.status, StatusCode::BAD_REQUEST);
        assert!(replay.location().is_none());
    }
}
