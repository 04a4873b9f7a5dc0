//! tokengate: an embeddable OAuth 2.0 authorization server.
//!
//! Implements the authorization code, implicit, refresh token and client credentials
//! grants over pluggable client, token and pending-authorization stores, with an
//! optional axum binding for the authorize, token and revocation endpoints.

pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
pub mod templates;
