//! Environment-based configuration types for tokengate server runtime settings.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::oauth::{EngineConfig, GrantType, RefreshTokenPolicy, Scope};

/// HTTP server port configuration
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// Refresh token policy configuration
#[derive(Clone, Debug)]
pub struct RefreshPolicy(RefreshTokenPolicy);

/// Access token lifetime configuration, `None` when tokens never expire
#[derive(Clone, Debug)]
pub struct AccessTokenLifetime(Option<chrono::Duration>);

/// Authorization code lifetime configuration
#[derive(Clone, Debug)]
pub struct AuthorizationCodeLifetime(chrono::Duration);

/// Refresh token lifetime configuration, `None` when tokens never expire
#[derive(Clone, Debug)]
pub struct RefreshTokenLifetime(Option<chrono::Duration>);

/// Lifetime of a staged authorize request awaiting consent
#[derive(Clone, Debug)]
pub struct PendingAuthorizationLifetime(chrono::Duration);

/// How long a redeemed authorization code is remembered for replay detection
#[derive(Clone, Debug)]
pub struct RedemptionRetention(chrono::Duration);

/// Upper bound on a single storage call
#[derive(Clone, Debug)]
pub struct StoreTimeout(Duration);

/// Period of the background sweep that drops expired store entries
#[derive(Clone, Debug)]
pub struct PurgeInterval(Duration);

/// Grant types the server accepts
#[derive(Clone, Debug)]
pub struct EnabledGrantTypes(Vec<GrantType>);

/// Server-wide scope vocabulary, `None` accepts any well-formed scope
#[derive(Clone, Debug)]
pub struct SupportedScopes(Option<Scope>);

/// Accept protected resource requests over plain HTTP
#[derive(Clone, Debug)]
pub struct AllowInsecureRequestDebug(bool);

/// Honor `X-Forwarded-Proto` set by a TLS-terminating proxy in front of the server
#[derive(Clone, Debug)]
pub struct TrustForwardedProto(bool);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub refresh_token_policy: RefreshPolicy,
    pub access_token_lifetime: AccessTokenLifetime,
    pub authorization_code_lifetime: AuthorizationCodeLifetime,
    pub refresh_token_lifetime: RefreshTokenLifetime,
    pub pending_authorization_lifetime: PendingAuthorizationLifetime,
    pub redemption_retention: RedemptionRetention,
    pub store_timeout: StoreTimeout,
    pub purge_interval: PurgeInterval,
    pub enabled_grant_types: EnabledGrantTypes,
    pub supported_scopes: SupportedScopes,
    pub allow_insecure_request_debug: AllowInsecureRequestDebug,
    pub trust_forwarded_proto: TrustForwardedProto,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let refresh_token_policy: RefreshPolicy =
            require_env("REFRESH_TOKEN_POLICY")?.try_into()?;
        let access_token_lifetime: AccessTokenLifetime =
            default_env("ACCESS_TOKEN_LIFETIME", "1h").try_into()?;
        let authorization_code_lifetime: AuthorizationCodeLifetime =
            default_env("AUTHORIZATION_CODE_LIFETIME", "30s").try_into()?;
        let refresh_token_lifetime: RefreshTokenLifetime =
            optional_env("REFRESH_TOKEN_LIFETIME").try_into()?;
        let pending_authorization_lifetime: PendingAuthorizationLifetime =
            default_env("PENDING_AUTHORIZATION_LIFETIME", "5m").try_into()?;
        let redemption_retention: RedemptionRetention =
            default_env("REDEMPTION_RETENTION", "1d").try_into()?;
        let store_timeout: StoreTimeout = default_env("STORE_TIMEOUT", "5s").try_into()?;
        let purge_interval: PurgeInterval = default_env("PURGE_INTERVAL", "1m").try_into()?;
        let enabled_grant_types: EnabledGrantTypes =
            optional_env("ENABLED_GRANT_TYPES").try_into()?;
        let supported_scopes: SupportedScopes = optional_env("SUPPORTED_SCOPES").try_into()?;
        let allow_insecure_request_debug: AllowInsecureRequestDebug =
            default_env("ALLOW_INSECURE_REQUEST_DEBUG", "false").try_into()?;
        let trust_forwarded_proto: TrustForwardedProto =
            default_env("TRUST_FORWARDED_PROTO", "false").try_into()?;

        Ok(Self {
            version: version()?,
            http_port,
            refresh_token_policy,
            access_token_lifetime,
            authorization_code_lifetime,
            refresh_token_lifetime,
            pending_authorization_lifetime,
            redemption_retention,
            store_timeout,
            purge_interval,
            enabled_grant_types,
            supported_scopes,
            allow_insecure_request_debug,
            trust_forwarded_proto,
        })
    }

    /// Grant engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(*self.refresh_token_policy.as_ref())
            .with_access_token_lifetime(*self.access_token_lifetime.as_ref())
            .with_authorization_code_lifetime(*self.authorization_code_lifetime.as_ref())
            .with_refresh_token_lifetime(*self.refresh_token_lifetime.as_ref())
            .with_pending_authorization_lifetime(*self.pending_authorization_lifetime.as_ref())
            .with_redemption_retention(*self.redemption_retention.as_ref())
            .with_store_timeout(*self.store_timeout.as_ref())
            .with_enabled_grant_types(self.enabled_grant_types.as_ref().clone())
            .with_supported_scopes(self.supported_scopes.as_ref().clone())
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_duration(value: String) -> Result<chrono::Duration, ConfigError> {
    let duration = duration_str::parse(&value)
        .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
    chrono::Duration::from_std(duration)
        .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
}

fn parse_bool(value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::BoolParsingFailed(value)),
    }
}

/// Empty and `never` both mean no expiry.
fn parse_optional_duration(value: Option<String>) -> Result<Option<chrono::Duration>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_empty() || v.eq_ignore_ascii_case("never") => Ok(None),
        Some(v) => parse_duration(v).map(Some),
    }
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for RefreshPolicy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<RefreshTokenPolicy>()
            .map(Self)
            .map_err(ConfigError::RefreshTokenPolicyInvalid)
    }
}

impl AsRef<RefreshTokenPolicy> for RefreshPolicy {
    fn as_ref(&self) -> &RefreshTokenPolicy {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenLifetime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_optional_duration(Some(value)).map(Self)
    }
}

impl AsRef<Option<chrono::Duration>> for AccessTokenLifetime {
    fn as_ref(&self) -> &Option<chrono::Duration> {
        &self.0
    }
}

impl TryFrom<String> for AuthorizationCodeLifetime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for AuthorizationCodeLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<Option<String>> for RefreshTokenLifetime {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        parse_optional_duration(value).map(Self)
    }
}

impl AsRef<Option<chrono::Duration>> for RefreshTokenLifetime {
    fn as_ref(&self) -> &Option<chrono::Duration> {
        &self.0
    }
}

impl TryFrom<String> for PendingAuthorizationLifetime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for PendingAuthorizationLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for RedemptionRetention {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for RedemptionRetention {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for StoreTimeout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self(Duration::from_secs(5)));
        }
        duration_str::parse(&value)
            .map(Self)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
    }
}

impl AsRef<Duration> for StoreTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for PurgeInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let interval = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
        if interval.is_zero() {
            return Err(ConfigError::DurationParsingFailed(
                value,
                "interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self(interval))
    }
}

impl AsRef<Duration> for PurgeInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<Option<String>> for EnabledGrantTypes {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = match value {
            None => return Ok(Self(GrantType::ALL.to_vec())),
            Some(v) if v.trim().is_empty() => return Ok(Self(GrantType::ALL.to_vec())),
            Some(v) => v,
        };

        let mut grant_types = Vec::new();
        for tag in value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let grant_type = tag
                .parse::<GrantType>()
                .map_err(ConfigError::GrantTypeInvalid)?;
            if !grant_types.contains(&grant_type) {
                grant_types.push(grant_type);
            }
        }
        Ok(Self(grant_types))
    }
}

impl AsRef<Vec<GrantType>> for EnabledGrantTypes {
    fn as_ref(&self) -> &Vec<GrantType> {
        &self.0
    }
}

impl TryFrom<Option<String>> for SupportedScopes {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = value.unwrap_or_default().replace(',', " ");
        if value.trim().is_empty() {
            return Ok(Self(None));
        }
        Scope::parse(&value)
            .map(|scope| Self(Some(scope)))
            .map_err(|e| ConfigError::InvalidScope(e.to_string()))
    }
}

impl AsRef<Option<Scope>> for SupportedScopes {
    fn as_ref(&self) -> &Option<Scope> {
        &self.0
    }
}

impl TryFrom<String> for AllowInsecureRequestDebug {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(value).map(Self)
    }
}

impl AsRef<bool> for AllowInsecureRequestDebug {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for TrustForwardedProto {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_bool(value).map(Self)
    }
}

impl AsRef<bool> for TrustForwardedProto {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}
