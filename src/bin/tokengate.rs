//! tokengate server binary.
//!
//! Serves the OAuth 2.0 endpoints backed by in-memory stores, seeds a demo client, and
//! exposes a `/clock` resource that requires the `VIEW_CLOCK` scope.

use anyhow::Result;
use axum::{Json, Router, routing::get};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tokengate::{
    config::Config,
    http::{AppState, ScopeGuard, build_router_with, protect},
    oauth::{
        AccessChecker, AuthorizationEndpoint, Client, ClientAuthMode, GrantEngine, GrantType,
        RandomTokenFactory, Scope,
    },
    storage::{
        ClientRegistry, MemoryClientRegistry, MemoryPendingAuthorizationStore, MemoryTokenStore,
    },
    templates::TemplateConsentHandler,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tokengate", version, about = "OAuth 2.0 authorization server")]
struct Cli {
    /// Identifier of the seeded demo client
    #[arg(long, env = "DEMO_CLIENT_ID", default_value = "test")]
    demo_client_id: String,

    /// Secret of the seeded demo client
    #[arg(long, env = "DEMO_CLIENT_SECRET", default_value = "test_secret")]
    demo_client_secret: String,

    /// Redirect URI registered for the demo client
    #[arg(
        long,
        env = "DEMO_REDIRECT_URI",
        default_value = "https://clientServer.com/return"
    )]
    demo_redirect_uri: String,
}

async fn handle_clock() -> Json<serde_json::Value> {
    Json(json!({ "now": chrono::Utc::now().to_rfc3339() }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tokengate=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;
    tracing::info!(
        version = %config.version,
        refresh_token_policy = %config.refresh_token_policy.as_ref(),
        "starting tokengate"
    );

    let clients = Arc::new(MemoryClientRegistry::new());
    let tokens = Arc::new(MemoryTokenStore::new());
    let pending = Arc::new(MemoryPendingAuthorizationStore::new());

    clients
        .add(Client::new(
            cli.demo_client_id.clone(),
            "Demo client",
            vec![cli.demo_redirect_uri.clone()],
            vec![GrantType::RefreshToken, GrantType::AuthorizationCode],
            ClientAuthMode::Confidential {
                secret: cli.demo_client_secret.clone(),
            },
        ))
        .await?;
    tracing::info!(client_id = %cli.demo_client_id, "registered demo client");

    let engine = Arc::new(GrantEngine::new(
        clients,
        tokens.clone(),
        pending.clone(),
        Arc::new(RandomTokenFactory),
        config.engine_config(),
    ));
    let consent = Arc::new(TemplateConsentHandler::new("/oauth2/authorize")?);
    let authorization_endpoint = Arc::new(AuthorizationEndpoint::new(engine.clone(), consent));
    let access_checker = Arc::new(
        AccessChecker::new(tokens.clone())
            .with_insecure_request_debug(*config.allow_insecure_request_debug.as_ref())
            .with_store_timeout(*config.store_timeout.as_ref()),
    );

    let resources = protect(
        Router::new().route("/clock", get(handle_clock)),
        ScopeGuard::new(access_checker.clone(), Scope::parse("VIEW_CLOCK")?)
            .with_trusted_forwarded_proto(*config.trust_forwarded_proto.as_ref()),
    );
    let app_state = AppState::new(engine, authorization_endpoint, access_checker);
    let app = build_router_with(app_state, resources);

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    {
        let purge_interval = *config.purge_interval.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(purge_interval);
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match (tokens.purge_expired().await, pending.purge_expired().await) {
                    (Ok(tokens_purged), Ok(pending_purged)) => {
                        if tokens_purged + pending_purged > 0 {
                            tracing::debug!(tokens_purged, pending_purged, "purged expired entries");
                        }
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        tracing::error!(error = %err, "purging expired entries failed");
                    }
                }
            }
        });
    }

    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {}: {}", bind_address, err);
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
