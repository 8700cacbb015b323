//! Google OAuth2 client configuration for the sign-in flow.

use std::fmt;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::{OAuthSettings, RuntimeEnv, SecretString};

use super::error::InfraError;

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/oauth2callback";
pub const SCOPES: [&str; 2] = ["email", "profile"];

/// Pick the redirect URL: `OAUTH2_CALLBACK`, then the configured value, then the local default.
pub fn resolve_redirect_url<'a>(
    env_override: Option<&'a str>,
    configured: Option<&'a str>,
) -> &'a str {
    env_override
        .filter(|url| !url.is_empty())
        .or_else(|| configured.filter(|url| !url.is_empty()))
        .unwrap_or(DEFAULT_REDIRECT_URL)
}

#[derive(Clone)]
pub struct OAuthConfig {
    client_id: String,
    client_secret: SecretString,
    redirect_url: Url,
    auth_url: Url,
    token_url: Url,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("redirect_url", &self.redirect_url.as_str())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Token returned by the provider's token endpoint.
#[derive(Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

fn parse_url(value: &str, what: &str) -> Result<Url, InfraError> {
    Url::parse(value).map_err(|err| InfraError::oauth(format!("invalid {what} `{value}`: {err}")))
}

impl OAuthConfig {
    pub fn from_settings(settings: &OAuthSettings, env: &RuntimeEnv) -> Result<Self, InfraError> {
        let redirect = resolve_redirect_url(env.oauth2_callback(), settings.redirect_url.as_deref());
        debug!(target: "bookshelf::startup", redirect_url = redirect, "resolved oauth redirect");

        Ok(Self {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_url: parse_url(redirect, "redirect url")?,
            auth_url: parse_url(AUTH_URL, "authorization url")?,
            token_url: parse_url(TOKEN_URL, "token url")?,
            scopes: SCOPES.iter().map(|scope| scope.to_string()).collect(),
            http: reqwest::Client::new(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Consent page URL that returns `state` to the redirect URL.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("access_type", "online")
            .append_pair("client_id", &self.client_id)
            .append_pair("prompt", "consent")
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        url
    }

    /// Exchange an authorization code for a token.
    pub async fn exchange(&self, code: &str) -> Result<Token, InfraError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", self.client_secret.expose())
            .finish();

        let response = self
            .http
            .post(self.token_url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .map_err(|err| InfraError::oauth(format!("token exchange failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InfraError::oauth(format!(
                "token endpoint returned {status}: {detail}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| InfraError::oauth(format!("malformed token response: {err}")))
    }
}
