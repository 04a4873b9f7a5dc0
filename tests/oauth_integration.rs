//! OAuth 2.0 Integration Tests
//!
//! These tests drive the complete flows through the axum router: authorization code with
//! consent, token exchange and replay, refresh scope checks, protected resource access,
//! and revocation.

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    routing::get,
};
use serde_json::Value;
use std::sync::Arc;
use tokengate::{
    http::{AppState, ScopeGuard, build_router_with, protect},
    oauth::{
        AccessChecker, AuthorizationEndpoint, Client, ClientAuthMode, EngineConfig, GrantEngine,
        GrantType, RandomTokenFactory, RefreshTokenPolicy, Scope,
    },
    storage::{
        ClientRegistry, MemoryClientRegistry, MemoryPendingAuthorizationStore, MemoryTokenStore,
    },
    templates::TemplateConsentHandler,
};
use tower::ServiceExt;

const REDIRECT_URI: &str = "https://a.example/cb";

/// The test app sits behind a proxy that sets `X-Forwarded-Proto`.
async fn app() -> Router {
    app_with(true).await
}

async fn app_with(trust_forwarded_proto: bool) -> Router {
    let clients = Arc::new(MemoryClientRegistry::new());
    clients
        .add(Client::new(
            "A",
            "Clock viewer",
            vec![REDIRECT_URI.to_string()],
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            ClientAuthMode::Public,
        ))
        .await
        .unwrap();
    let tokens = Arc::new(MemoryTokenStore::new());
    let engine = Arc::new(GrantEngine::new(
        clients,
        tokens.clone(),
        Arc::new(MemoryPendingAuthorizationStore::new()),
        Arc::new(RandomTokenFactory),
        EngineConfig::new(RefreshTokenPolicy::Static),
    ));
    let consent = Arc::new(TemplateConsentHandler::new("/oauth2/authorize").unwrap());
    let authorization_endpoint = Arc::new(AuthorizationEndpoint::new(engine.clone(), consent));
    let access_checker = Arc::new(AccessChecker::new(tokens));

    let resources = protect(
        Router::new().route("/clock", get(|| async { Json(serde_json::json!({ "now": "noon" })) })),
        ScopeGuard::new(access_checker.clone(), Scope::parse("VIEW_CLOCK").unwrap())
            .with_trusted_forwarded_proto(trust_forwarded_proto),
    );
    build_router_with(
        AppState::new(engine, authorization_endpoint, access_checker),
        resources,
    )
}

fn form(pairs: &[(&str, &str)]) -> Body {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    Body::from(serializer.finish())
}

fn post(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(form(pairs))
        .unwrap()
}

fn clock(token: Option<&str>, secure: bool) -> Request<Body> {
    let mut builder = Request::builder().uri("/clock");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if secure {
        builder = builder.header("x-forwarded-proto", "https");
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn query_param(location: &str, name: &str) -> Option<String> {
    url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Run authorize and consent, returning the redirect location.
async fn authorize(app: &Router, scope: &str, confirm: &str) -> String {
    let uri = format!(
        "/oauth2/authorize?response_type=code&client_id=A&redirect_uri={}&scope={}&state=S",
        url::form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>(),
        url::form_urlencoded::byte_serialize(scope.as_bytes()).collect::<String>(),
    );
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page = body_text(response).await;
    let marker = "name=\"data_key\" value=\"";
    let start = page.find(marker).unwrap() + marker.len();
    let end = start + page[start..].find('"').unwrap();
    let data_key = page[start..end].to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/oauth2/authorize",
            &[("data_key", &data_key), ("confirm", confirm)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn exchange(app: &Router, code: &str) -> axum::response::Response {
    app.clone()
        .oneshot(post(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", "A"),
            ],
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_complete_authorization_code_flow() {
    let app = app().await;

    // Step 1: Authorization with consent
    let location = authorize(&app, "VIEW_CLOCK", "yes").await;
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "state").as_deref(), Some("S"));
    let code = query_param(&location, "code").unwrap();

    // Step 2: Token exchange
    let response = exchange(&app, &code).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert!(body["refresh_token"].is_string());
    assert!(body.get("scope").is_none());
    let access_token = body["access_token"].as_str().unwrap().to_string();

    // Step 3: Protected resource access
    let response = app
        .clone()
        .oneshot(clock(Some(&access_token), true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["now"], "noon");

    // Step 4: Code replay
    let response = exchange(&app, &code).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // Replaying the code revoked what it had issued
    let response = app
        .clone()
        .oneshot(clock(Some(&access_token), true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_consent_denied() {
    let app = app().await;
    let location = authorize(&app, "VIEW_CLOCK", "no").await;
    assert_eq!(location, "https://a.example/cb?error=access_denied&state=S");
}

#[tokio::test]
async fn test_unknown_client_is_not_redirected() {
    let app = app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/oauth2/authorize?response_type=code&client_id=nobody&state=S")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_refresh_cannot_widen_scope() {
    let app = app().await;
    let location = authorize(&app, "VIEW_CLOCK", "yes").await;
    let code = query_param(&location, "code").unwrap();
    let body = body_json(exchange(&app, &code).await).await;
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/oauth2/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("scope", "VIEW_CLOCK SET_CLOCK"),
                ("client_id", "A"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_scope");

    let response = app
        .clone()
        .oneshot(post(
            "/oauth2/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", "A"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["refresh_token"], refresh_token.as_str());
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn test_protected_resource_denials() {
    let app = app().await;
    let location = authorize(&app, "OTHER", "yes").await;
    let code = query_param(&location, "code").unwrap();
    let body = body_json(exchange(&app, &code).await).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = app.clone().oneshot(clock(None, true)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );

    let response = app
        .clone()
        .oneshot(clock(Some(&access_token), false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Insufficient scope looks the same as an unknown token
    let insufficient = app
        .clone()
        .oneshot(clock(Some(&access_token), true))
        .await
        .unwrap();
    let unknown = app
        .clone()
        .oneshot(clock(Some("not-a-token"), true))
        .await
        .unwrap();
    assert_eq!(insufficient.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(insufficient).await, body_text(unknown).await);
}

#[tokio::test]
async fn test_revocation() {
    let app = app().await;
    let location = authorize(&app, "VIEW_CLOCK", "yes").await;
    let code = query_param(&location, "code").unwrap();
    let body = body_json(exchange(&app, &code).await).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/oauth2/revoke",
            &[("token", &access_token), ("client_id", "A")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(clock(Some(&access_token), true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown tokens revoke successfully
    let response = app
        .clone()
        .oneshot(post(
            "/oauth2/revoke",
            &[("token", "unknown"), ("client_id", "A")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_proto_ignored_unless_trusted() {
    let app = app_with(false).await;
    let location = authorize(&app, "VIEW_CLOCK", "yes").await;
    let code = query_param(&location, "code").unwrap();
    let body = body_json(exchange(&app, &code).await).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(clock(Some(&access_token), true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}
