//! OAuth 2.0 authorization server core: grant engine, endpoint logic and access checks.

pub mod access_check;
pub mod authorize_endpoint;
pub mod grant_engine;
pub mod response;
pub mod scope;
pub mod token_endpoint;
pub mod token_factory;
pub mod types;

#[cfg(test)]
pub mod expiry_tests;

pub use access_check::{AccessChecker, AccessDecision, DenialReason, bearer_token, denial_response};
pub use authorize_endpoint::{AuthorizationEndpoint, ConsentHandler, ConsentRequest};
pub use grant_engine::{
    AuthorizationRequest, AuthorizeRejection, EngineConfig, GrantEngine, RefreshTokenPolicy,
    ValidatedAuthorization,
};
pub use response::{AuthorizationRedirect, EndpointResponse};
pub use scope::Scope;
pub use token_endpoint::{
    RevocationForm, TokenEndpoint, TokenForm, TokenRequest, extract_client_credentials,
};
pub use token_factory::{RandomTokenFactory, TokenFactory, UuidTokenFactory};
pub use types::{
    Client, ClientAuthMode, ClientCredentials, GrantType, OAuthErrorResponse,
    PendingAuthorization, ResponseType, TokenKind, TokenRecord, TokenResponse, TokenType,
};
