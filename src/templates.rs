//! Minijinja consent page used by the bundled consent handler.

use async_trait::async_trait;
use http::StatusCode;
use minijinja::{Environment, context};

use crate::errors::{HttpError, OAuthError};
use crate::oauth::{ConsentHandler, ConsentRequest, EndpointResponse};

const CONSENT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Authorize {{ client_name }}</title>
</head>
<body>
<h1>Authorize {{ client_name }}</h1>
<p>{{ client_name }} is requesting access to:</p>
<ul>
{% for item in scope %}
<li>{{ item }}</li>
{% endfor %}
</ul>
<form method="post" action="{{ action }}">
<input type="hidden" name="data_key" value="{{ data_key }}">
<button type="submit" name="confirm" value="yes">Allow</button>
<button type="submit" name="confirm" value="no">Deny</button>
</form>
</body>
</html>
"#;

/// Build the template environment with the embedded consent page.
pub fn build_env() -> Result<Environment<'static>, HttpError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("consent.html", CONSENT_TEMPLATE)
        .map_err(|e| HttpError::TemplateRenderingFailed(e.to_string()))?;
    Ok(env)
}

/// Renders an Allow/Deny form that posts the decision back to `action`.
///
/// The form submits `data_key` and `confirm=yes|no`. Scopes outside `offered`, when
/// set, are refused before the page is shown.
pub struct TemplateConsentHandler {
    env: Environment<'static>,
    action: String,
    offered: Option<crate::oauth::Scope>,
}

impl TemplateConsentHandler {
    pub fn new(action: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self {
            env: build_env()?,
            action: action.into(),
            offered: None,
        })
    }

    pub fn with_offered_scope(mut self, scope: crate::oauth::Scope) -> Self {
        self.offered = Some(scope);
        self
    }

    fn render(&self, request: &ConsentRequest) -> Result<String, HttpError> {
        let template = self
            .env
            .get_template("consent.html")
            .map_err(|e| HttpError::TemplateRenderingFailed(e.to_string()))?;
        template
            .render(context! {
                client_name => request.client.name,
                scope => request.scope.iter().collect::<Vec<_>>(),
                data_key => request.data_key,
                action => self.action,
            })
            .map_err(|e| HttpError::TemplateRenderingFailed(e.to_string()))
    }
}

#[async_trait]
impl ConsentHandler for TemplateConsentHandler {
    async fn on_authenticate(&self, request: &ConsentRequest) -> Result<EndpointResponse, OAuthError> {
        if let Some(offered) = &self.offered {
            if !request.scope.is_subset_of(offered) {
                return Err(OAuthError::InvalidScope(format!(
                    "Scope not offered: {}",
                    request.scope.missing_from(offered).join(" ")
                )));
            }
        }
        let body = self.render(request).map_err(|e| {
            tracing::error!(error = %e, "consent page rendering failed");
            OAuthError::ServerError("Unable to render consent page".to_string())
        })?;
        Ok(EndpointResponse::html(StatusCode::OK, body))
    }
}
