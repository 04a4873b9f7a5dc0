//! Transport-neutral response descriptions produced by the endpoint logic.

use http::{HeaderMap, HeaderValue, StatusCode, header};
use serde::Serialize;
use url::{Url, form_urlencoded};

use crate::errors::OAuthError;
use crate::oauth::types::OAuthErrorResponse;

/// A redirect back to a client's verified redirect URI.
///
/// Parameters go in the query, or in the fragment for implicit-flow responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    pub redirect_uri: String,
    pub params: Vec<(&'static str, String)>,
    pub use_fragment: bool,
}

impl AuthorizationRedirect {
    pub fn new(redirect_uri: impl Into<String>, use_fragment: bool) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            params: Vec::new(),
            use_fragment,
        }
    }

    pub fn with_param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    pub fn with_optional_param(self, name: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with_param(name, value),
            None => self,
        }
    }

    /// Error redirect carrying `error`, `error_description` and the echoed `state`.
    pub fn error(
        redirect_uri: impl Into<String>,
        error: &OAuthError,
        state: Option<&str>,
        use_fragment: bool,
    ) -> Self {
        let description = error.description();
        Self::new(redirect_uri, use_fragment)
            .with_param("error", error.error_code())
            .with_optional_param(
                "error_description",
                (!description.is_empty()).then_some(description),
            )
            .with_optional_param("state", state)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The full `Location` value.
    pub fn location(&self) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.redirect_uri).map_err(|e| {
            OAuthError::ServerError(format!("Stored redirect URI is invalid: {}", e))
        })?;
        if self.use_fragment {
            let fragment = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.params.iter().map(|(k, v)| (*k, v.as_str())))
                .finish();
            url.set_fragment(Some(&fragment));
        } else if !self.params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url.to_string())
    }
}

/// Status, headers and body for the transport layer to write out.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl EndpointResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// JSON body with the no-store caching headers RFC 6749 requires on token responses.
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                let mut response = Self::new(status);
                response.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response
                    .headers
                    .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                response
                    .headers
                    .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
                response.body = bytes;
                response
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to serialize response body");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// A direct, non-redirect error response.
    pub fn error(error: &OAuthError, state: Option<String>) -> Self {
        Self::json(
            error.status_code(),
            &OAuthErrorResponse::from_error(error, state),
        )
    }

    pub fn html(status: StatusCode, body: String) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response.body = body.into_bytes();
        response
    }

    /// `302 Found` to the redirect's location.
    pub fn redirect(redirect: &AuthorizationRedirect) -> Self {
        let location = match redirect.location() {
            Ok(location) => location,
            Err(e) => return Self::error(&e, None),
        };
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                let mut response = Self::new(StatusCode::FOUND);
                response.headers.insert(header::LOCATION, value);
                response
            }
            Err(e) => Self::error(
                &OAuthError::ServerError(format!("Redirect location is not a valid header: {}", e)),
                None,
            ),
        }
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_redirect_preserves_existing_query() {
        let redirect = AuthorizationRedirect::new("https://a.example/cb?app=1", false)
            .with_param("code", "XYZ")
            .with_param("state", "S S");
        assert_eq!(
            redirect.location().unwrap(),
            "https://a.example/cb?app=1&code=XYZ&state=S+S"
        );
    }

    #[test]
    fn test_fragment_redirect() {
        let redirect = AuthorizationRedirect::new("https://a.example/cb", true)
            .with_param("access_token", "tok")
            .with_param("token_type", "Bearer");
        assert_eq!(
            redirect.location().unwrap(),
            "https://a.example/cb#access_token=tok&token_type=Bearer"
        );
    }

    #[test]
    fn test_error_redirect() {
        let redirect = AuthorizationRedirect::error(
            "https://a.example/cb",
            &OAuthError::AccessDenied(String::new()),
            Some("S"),
            false,
        );
        assert_eq!(
            redirect.location().unwrap(),
            "https://a.example/cb?error=access_denied&state=S"
        );
    }

    #[test]
    fn test_redirect_response() {
        let response =
            EndpointResponse::redirect(&AuthorizationRedirect::new("https://a.example/cb", false));
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.location(), Some("https://a.example/cb"));
    }

    #[test]
    fn test_error_response() {
        let response = EndpointResponse::error(&OAuthError::InvalidClient("nope".to_string()), None);
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.json_body().unwrap(),
            serde_json::json!({"error": "invalid_client", "error_description": "nope"})
        );
        assert_eq!(
            response.headers.get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }
}
