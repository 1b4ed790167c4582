use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

pub const DEFAULT_SETTINGS_FILENAME: &str = "settings.toml";
pub const DEFAULT_USER_AGENT: &str = "Crosswords/20191213190708 CFNetwork/1128.0.1 Darwin/19.6.0";
pub const DEFAULT_LOGIN_CLIENT_ID: &str = "ios.crosswords";
pub const DEFAULT_BASE_URL: &str = "https://www.nytimes.com";
pub const DEFAULT_LOGIN_URL: &str = "https://myaccount.nytimes.com/svc/ios/v2/login";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_AUTH_COOKIE_NAME: &str = "NYT-S";
pub const DEFAULT_COOKIE_DOMAIN: &str = ".nytimes.com";
pub const DEFAULT_ARCHIVE_KIND: &str = "mini";

/// On-disk settings. Every key is optional; empty strings count as unset.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SettingsFile {
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub site: SiteSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CredentialsSection {
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    pub mode: Option<String>,
    pub headless: Option<bool>,
    pub months: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub base_url: Option<String>,
    pub login_url: Option<String>,
    pub login_client_id: Option<String>,
    pub webdriver_url: Option<String>,
    pub browser: Option<String>,
    pub user_agent: Option<String>,
    pub archive_kind: Option<String>,
    pub auth_cookie_name: Option<String>,
    pub cookie_domain: Option<String>,
    pub page_load_timeout_ms: Option<u64>,
    pub element_timeout_ms: Option<u64>,
    #[serde(default)]
    pub selectors: SelectorSection,
}

/// CSS selectors unless noted otherwise.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SelectorSection {
    pub calendar: Option<String>,
    pub day_link: Option<String>,
    pub day_complete: Option<String>,
    pub signed_in: Option<String>,
    pub grid_cell: Option<String>,
    pub block_cell_class: Option<String>,
    /// XPath.
    pub play_button: Option<String>,
    /// XPath.
    pub reset_button: Option<String>,
    /// XPath, optional confirmation step after reset.
    pub confirm_button: Option<String>,
}

impl CredentialsSection {
    pub fn username(&self) -> Option<String> {
        non_empty(self.username.as_deref())
    }

    pub fn password(&self) -> Option<String> {
        non_empty(self.password.as_deref())
    }

    pub fn cookie(&self) -> Option<String> {
        non_empty(self.cookie.as_deref())
    }
}

impl SiteSection {
    /// Resolve the WebDriver endpoint: env XWRESET_WEBDRIVER_URL > config > default.
    pub fn webdriver_url(&self) -> String {
        self.webdriver_url_with_lookup(|key| env::var(key).ok())
    }

    pub fn webdriver_url_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = non_empty(lookup_env("XWRESET_WEBDRIVER_URL").as_deref()) {
            return value;
        }
        non_empty(self.webdriver_url.as_deref())
            .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string())
    }

    pub fn base_url(&self) -> String {
        non_empty(self.base_url.as_deref())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn login_url(&self) -> String {
        non_empty(self.login_url.as_deref()).unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
    }

    pub fn login_client_id(&self) -> String {
        non_empty(self.login_client_id.as_deref())
            .unwrap_or_else(|| DEFAULT_LOGIN_CLIENT_ID.to_string())
    }

    pub fn user_agent(&self) -> String {
        non_empty(self.user_agent.as_deref()).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn archive_kind(&self) -> String {
        non_empty(self.archive_kind.as_deref())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_KIND.to_string())
    }

    pub fn auth_cookie_name(&self) -> String {
        non_empty(self.auth_cookie_name.as_deref())
            .unwrap_or_else(|| DEFAULT_AUTH_COOKIE_NAME.to_string())
    }

    pub fn cookie_domain(&self) -> String {
        non_empty(self.cookie_domain.as_deref())
            .unwrap_or_else(|| DEFAULT_COOKIE_DOMAIN.to_string())
    }
}

/// Load and parse the settings file. Returns default if the file doesn't exist.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: SettingsFile =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub set_cookie: Option<String>,
    pub set_username: Option<String>,
    pub set_password: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.set_cookie.is_none() && self.set_username.is_none() && self.set_password.is_none()
    }
}

/// Update selected keys under `[credentials]` while preserving all other sections.
/// Returns `true` when a write occurred.
pub fn patch_settings_file(path: &Path, patch: &SettingsPatch) -> Result<bool> {
    if patch.is_empty() {
        return Ok(false);
    }

    let mut root = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("top-level TOML must be a table in {}", path.display()))?;
    let credentials_entry = root_table
        .entry("credentials".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let credentials_table = credentials_entry.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!("[credentials] must be a table in {}", path.display())
    })?;

    for (key, value) in [
        ("cookie", &patch.set_cookie),
        ("username", &patch.set_username),
        ("password", &patch.set_password),
    ] {
        if let Some(value) = value {
            credentials_table.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    if root == original {
        return Ok(false);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = toml::to_string_pretty(&root).context("failed to serialize settings TOML")?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
