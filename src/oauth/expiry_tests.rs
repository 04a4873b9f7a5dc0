//! Expiry handling validation tests.
//!
//! Verifies UTC expiry stamps and lazy expiry across the token store and the grant flows.

#[cfg(test)]
mod tests {
    use super::super::{
        grant_engine::{AuthorizationRequest, EngineConfig, GrantEngine, RefreshTokenPolicy},
        scope::Scope,
        token_factory::UuidTokenFactory,
        types::*,
    };
    use crate::storage::{
        MemoryClientRegistry, MemoryPendingAuthorizationStore, MemoryTokenStore, ClientRegistry,
        TokenStore,
    };
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    /// Test that issued token records carry UTC expiry stamps
    #[tokio::test]
    async fn test_token_expiry_is_utc() {
        let now = Utc::now();
        let record = TokenRecord::new(TokenKind::AccessToken, "client", Scope::empty())
            .with_expires_at(Some(now + Duration::hours(1)));

        let expires_at = record.expires_at.unwrap();
        assert_eq!(expires_at.timezone(), Utc);
        assert!(expires_at > now);
    }

    /// Test the boundary: a record expiring exactly now is expired
    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let record = TokenRecord::new(TokenKind::AccessToken, "client", Scope::empty());
        assert!(!record.is_expired_at(now));

        let record = record.with_expires_at(Some(now));
        assert!(record.is_expired_at(now));
        assert!(!record.is_expired_at(now - Duration::milliseconds(1)));
    }

    /// Test that expiry is checked on every read, with no background sweep
    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let store = MemoryTokenStore::new();
        let read = Scope::parse("read").unwrap();
        store
            .store(
                "short",
                TokenRecord::new(TokenKind::AccessToken, "client", read.clone())
                    .with_expires_at(Some(Utc::now() + Duration::milliseconds(50))),
            )
            .await
            .unwrap();

        assert!(store.contains("short").await.unwrap());
        assert!(store.has_access("short", &read).await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        assert!(!store.contains("short").await.unwrap());
        assert!(store.has_access("short", &read).await.is_err());
        assert!(store.get_data("short").await.is_err());
    }

    /// Test that issued lifetimes follow the engine configuration
    #[tokio::test]
    async fn test_issued_lifetimes() {
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
        let tokens = Arc::new(MemoryTokenStore::new());
        let engine = GrantEngine::new(
            clients,
            tokens.clone(),
            Arc::new(MemoryPendingAuthorizationStore::new()),
            Arc::new(UuidTokenFactory),
            EngineConfig::new(RefreshTokenPolicy::Static)
                .with_access_token_lifetime(Some(Duration::minutes(10)))
                .with_refresh_token_lifetime(Some(Duration::days(14))),
        );

        let before = Utc::now();
        let validated = engine
            .validate_authorization(AuthorizationRequest {
                response_type: Some("code".to_string()),
                client_id: Some("A".to_string()),
                redirect_uri: None,
                scope: Some("read".to_string()),
                state: None,
            })
            .await
            .unwrap();
        let data_key = engine.stage(&validated).await.unwrap();
        let redirect = engine.grant(&data_key, None).await.unwrap();
        let code = redirect.param("code").unwrap().to_string();

        let code_record = tokens.get(&code).await.unwrap().unwrap();
        let code_expiry = code_record.expires_at.unwrap();
        assert!(code_expiry <= Utc::now() + Duration::seconds(30));
        assert!(code_expiry >= before + Duration::seconds(30));

        let credentials = ClientCredentials {
            client_id: "A".to_string(),
            client_secret: None,
        };
        let response = engine.exchange_code(&credentials, &code, None).await.unwrap();
        assert_eq!(response.expires_in, Some(600));

        let refresh = tokens
            .get(response.refresh_token.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        let refresh_expiry = refresh.expires_at.unwrap();
        assert!(refresh_expiry >= before + Duration::days(14));
        assert!(refresh_expiry <= Utc::now() + Duration::days(14));
    }

    /// Test that tokens without a lifetime never expire
    #[tokio::test]
    async fn test_no_expiry_omits_expires_in() {
        let clients = Arc::new(MemoryClientRegistry::new());
        clients
            .add(
                Client::new(
                    "svc",
                    "Service",
                    Vec::new(),
                    vec![GrantType::ClientCredentials],
                    ClientAuthMode::Confidential {
                        secret: "pw".to_string(),
                    },
                )
                .with_allowed_scope(Scope::parse("jobs").unwrap()),
            )
            .await
            .unwrap();
        let tokens = Arc::new(MemoryTokenStore::new());
        let engine = GrantEngine::new(
            clients,
            tokens.clone(),
            Arc::new(MemoryPendingAuthorizationStore::new()),
            Arc::new(UuidTokenFactory),
            EngineConfig::new(RefreshTokenPolicy::Static).with_access_token_lifetime(None),
        );
        let response = engine
            .client_credentials(
                &ClientCredentials {
                    client_id: "svc".to_string(),
                    client_secret: Some("pw".to_string()),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.expires_in, None);
        let record = tokens.get(&response.access_token).await.unwrap().unwrap();
        assert_eq!(record.expires_at, None);
    }
}
