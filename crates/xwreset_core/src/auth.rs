use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{SettingsPatch, SiteSection};
use crate::error::ResetError;
use crate::prompt::Prompter;
use crate::runtime::{Credentials, Secret, Settings, prompt_credentials};
use crate::site::PuzzleSite;

/// Exchanges a username and password for the site's session token.
pub trait LoginApi {
    fn login(&mut self, username: &str, password: &Secret) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct LoginClientConfig {
    pub login_url: String,
    pub user_agent: String,
    pub client_id: String,
    pub cookie_name: String,
    pub timeout_ms: u64,
}

impl LoginClientConfig {
    pub fn from_section(section: &SiteSection) -> Self {
        Self {
            login_url: section.login_url(),
            user_agent: section.user_agent(),
            client_id: section.login_client_id(),
            cookie_name: section.auth_cookie_name(),
            timeout_ms: 30_000,
        }
    }
}

/// Form login against the account service used by the mobile crossword app.
pub struct HttpLoginClient {
    client: Client,
    config: LoginClientConfig,
}

impl HttpLoginClient {
    pub fn new(config: LoginClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build login HTTP client")?;
        Ok(Self { client, config })
    }
}

impl LoginApi for HttpLoginClient {
    fn login(&mut self, username: &str, password: &Secret) -> Result<String> {
        let form = [("login", username), ("password", password.expose())];
        let response = self
            .client
            .post(&self.config.login_url)
            .header("User-Agent", self.config.user_agent.clone())
            .header("client_id", self.config.client_id.clone())
            .form(&form)
            .send()
            .with_context(|| format!("failed to reach {}", self.config.login_url))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            bail!("credentials were rejected (HTTP {status})");
        }
        if !status.is_success() {
            bail!("login request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode login response")?;
        extract_auth_token(&payload, &self.config.cookie_name)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    cookies: Vec<LoginCookie>,
}

#[derive(Debug, Deserialize)]
struct LoginCookie {
    name: String,
    #[serde(rename = "cipheredValue")]
    ciphered_value: Option<String>,
    value: Option<String>,
}

/// Pulls the named cookie's value out of a login response.
pub fn extract_auth_token(payload: &Value, cookie_name: &str) -> Result<String> {
    let parsed: LoginResponse =
        serde_json::from_value(payload.clone()).context("unexpected login response shape")?;
    let cookies = parsed.data.map(|data| data.cookies).unwrap_or_default();
    cookies
        .into_iter()
        .find(|cookie| cookie.name == cookie_name)
        .and_then(|cookie| cookie.ciphered_value.or(cookie.value))
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("login response did not include the {cookie_name} cookie"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Cookie,
    Credentials,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Credentials => "credentials",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub method: AuthMethod,
    /// Token obtained by credential login; the caller persists it.
    pub refreshed_cookie: Option<Secret>,
    /// Credentials asked for after the stored cookie was rejected.
    pub prompted_credentials: Option<Credentials>,
}

impl AuthOutcome {
    /// Settings keys to write back once the session is authenticated.
    pub fn persist_patch(&self, settings: &Settings) -> SettingsPatch {
        settings.persist_patch(
            self.refreshed_cookie.as_ref().map(Secret::expose),
            self.prompted_credentials.as_ref(),
        )
    }
}

/// Stored cookie first, credential login as fallback. No retries.
///
/// Credentials missing from settings are asked for through `prompter` only
/// once the cookie has been rejected.
pub fn authenticate<S, L>(
    site: &mut S,
    login: &mut L,
    settings: &Settings,
    prompter: &mut dyn Prompter,
) -> Result<AuthOutcome, ResetError>
where
    S: PuzzleSite + ?Sized,
    L: LoginApi + ?Sized,
{
    if let Some(cookie) = &settings.cookie {
        info!("injecting stored auth cookie");
        match verify_token(site, cookie.expose()) {
            Ok(true) => {
                info!("stored cookie accepted");
                return Ok(AuthOutcome {
                    method: AuthMethod::Cookie,
                    refreshed_cookie: None,
                    prompted_credentials: None,
                });
            }
            Ok(false) => warn!("stored cookie was rejected, falling back to credential login"),
            Err(error) => warn!("could not verify stored cookie ({error:#}), falling back to credential login"),
        }
    }

    let (credentials, prompted_credentials) = match &settings.credentials {
        Some(credentials) => (credentials.clone(), None),
        None => {
            let credentials = prompt_credentials(prompter).map_err(|error| {
                ResetError::authentication(error.context(
                    "stored cookie was rejected and no username/password is configured",
                ))
            })?;
            (credentials.clone(), Some(credentials))
        }
    };

    info!(username = %credentials.username, "logging in with credentials");
    let token = login
        .login(&credentials.username, &credentials.password)
        .map_err(ResetError::authentication)?;

    match verify_token(site, &token) {
        Ok(true) => {
            info!("credential login succeeded");
            Ok(AuthOutcome {
                method: AuthMethod::Credentials,
                refreshed_cookie: Some(Secret::new(token)),
                prompted_credentials,
            })
        }
        Ok(false) => Err(ResetError::Authentication(
            "the site did not accept the token issued by login".to_string(),
        )),
        Err(error) => Err(ResetError::authentication(
            error.context("failed to verify the token issued by login"),
        )),
    }
}

fn verify_token<S: PuzzleSite + ?Sized>(site: &mut S, token: &str) -> Result<bool> {
    site.inject_auth_cookie(token)
        .context("failed to inject auth cookie")?;
    site.is_authenticated()
}
