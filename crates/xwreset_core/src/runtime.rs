use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;

use crate::archive::{DEFAULT_LIST_FILENAME, MAX_ARCHIVE_MONTHS, YearMonth, parse_puzzle_date};
use crate::config::{SettingsFile, SettingsPatch, non_empty};
use crate::error::ResetError;
use crate::prompt::Prompter;

pub const PROMPT_ATTEMPTS: usize = 3;
const USERNAME_PROMPT: &str = "Enter NYTimes username: ";
const PASSWORD_PROMPT: &str = "Enter NYTimes password: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Scan,
    Fix,
    Both,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(Self::Scan),
            "fix" => Ok(Self::Fix),
            "both" => Ok(Self::Both),
            other => bail!("invalid mode: {other:?} (expected scan|fix|both)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Fix => "fix",
            Self::Both => "both",
        }
    }

    pub fn scans(self) -> bool {
        matches!(self, Self::Scan | Self::Both)
    }

    pub fn fixes(self) -> bool {
        matches!(self, Self::Fix | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Flag,
    Env,
    File,
    Prompt,
    Default,
    Unset,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::File => "file",
            Self::Prompt => "prompt",
            Self::Default => "default",
            Self::Unset => "unset",
        }
    }
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
}

/// Values supplied on the command line. Strings are parsed during resolution so
/// that bad input surfaces as a configuration error.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub mode: Option<String>,
    pub headless: Option<String>,
    pub months: Option<i64>,
    pub through: Option<String>,
    pub list_path: Option<PathBuf>,
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettingsSources {
    pub mode: ValueSource,
    pub headless: ValueSource,
    pub months: ValueSource,
    pub through: ValueSource,
    pub username: ValueSource,
    pub password: ValueSource,
    pub cookie: ValueSource,
}

/// Fully resolved run configuration, passed explicitly to each stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Option<Credentials>,
    pub cookie: Option<Secret>,
    pub mode: Mode,
    pub headless: bool,
    /// Present whenever the mode scans.
    pub months: Option<u32>,
    pub through: YearMonth,
    pub list_path: PathBuf,
    /// Explicit dates to fix instead of the list file.
    pub fix_dates: Option<Vec<NaiveDate>>,
    pub sources: SettingsSources,
}

impl Settings {
    /// Keys to write back after authentication: prompted credentials and a
    /// refreshed cookie. `late_credentials` are the ones asked for only after
    /// the stored cookie was rejected.
    pub fn persist_patch(
        &self,
        refreshed_cookie: Option<&str>,
        late_credentials: Option<&Credentials>,
    ) -> SettingsPatch {
        let mut patch = SettingsPatch {
            set_cookie: refreshed_cookie.map(ToString::to_string),
            ..SettingsPatch::default()
        };
        if let Some(credentials) = late_credentials {
            patch.set_username = Some(credentials.username.clone());
            patch.set_password = Some(credentials.password.expose().to_string());
        } else if let Some(credentials) = &self.credentials {
            if self.sources.username == ValueSource::Prompt {
                patch.set_username = Some(credentials.username.clone());
            }
            if self.sources.password == ValueSource::Prompt {
                patch.set_password = Some(credentials.password.expose().to_string());
            }
        }
        patch
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "mode={} ({})\nheadless={} ({})\nmonths={} ({})\nthrough={} ({})\nlist_path={}\nfix_dates={}\nusername={} ({})\npassword={} ({})\ncookie={} ({})",
            self.mode.as_str(),
            self.sources.mode.as_str(),
            self.headless,
            self.sources.headless.as_str(),
            self.months
                .map(|months| months.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
            self.sources.months.as_str(),
            self.through,
            self.sources.through.as_str(),
            self.list_path.to_string_lossy().replace('\\', "/"),
            self.fix_dates
                .as_ref()
                .map(|dates| dates.len().to_string())
                .unwrap_or_else(|| "from list".to_string()),
            self.credentials
                .as_ref()
                .map(|credentials| credentials.username.as_str())
                .unwrap_or("<none>"),
            self.sources.username.as_str(),
            if self.credentials.is_some() { "set" } else { "unset" },
            self.sources.password.as_str(),
            if self.cookie.is_some() { "set" } else { "unset" },
            self.sources.cookie.as_str(),
        )
    }
}

pub fn resolve_settings(
    file: &SettingsFile,
    overrides: &RunOverrides,
    prompter: &mut dyn Prompter,
) -> Result<Settings, ResetError> {
    resolve_settings_with_lookup(file, overrides, |key| env::var(key).ok(), prompter)
}

/// Precedence for every value: flag > env > settings file > prompt.
pub fn resolve_settings_with_lookup<F>(
    file: &SettingsFile,
    overrides: &RunOverrides,
    lookup_env: F,
    prompter: &mut dyn Prompter,
) -> Result<Settings, ResetError>
where
    F: Fn(&str) -> Option<String>,
{
    resolve_inner(file, overrides, &lookup_env, prompter).map_err(ResetError::configuration)
}

fn resolve_inner<F>(
    file: &SettingsFile,
    overrides: &RunOverrides,
    lookup_env: &F,
    prompter: &mut dyn Prompter,
) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let (mode, mode_source) = resolve_mode(file, overrides, lookup_env, prompter)?;
    let (headless, headless_source) = resolve_headless(file, overrides, lookup_env, prompter)?;
    let (months, months_source) = if mode.scans() {
        let (months, source) = resolve_months(file, overrides, lookup_env, prompter)?;
        (Some(months), source)
    } else {
        (None, ValueSource::Unset)
    };

    let (through, through_source) = match overrides.through.as_deref() {
        Some(value) => (
            YearMonth::parse(value).context("invalid --through")?,
            ValueSource::Flag,
        ),
        None => (YearMonth::current(), ValueSource::Default),
    };

    let cookie = pick(
        None,
        lookup_env("XWRESET_COOKIE"),
        file.credentials.cookie(),
    );
    let (cookie, cookie_source) = match cookie {
        Some((value, source)) => (Some(Secret::new(value)), source),
        None => (None, ValueSource::Unset),
    };

    // A stored cookie supersedes credentials; they are only prompted for without one.
    let username = pick(None, lookup_env("XWRESET_USERNAME"), file.credentials.username());
    let password = pick(None, lookup_env("XWRESET_PASSWORD"), file.credentials.password());
    let (username, username_source) = match username {
        Some(found) => (Some(found.0), found.1),
        None if cookie.is_none() => (
            Some(prompt_non_empty(prompter, USERNAME_PROMPT, false)?),
            ValueSource::Prompt,
        ),
        None => (None, ValueSource::Unset),
    };
    let (password, password_source) = match password {
        Some(found) => (Some(found.0), found.1),
        None if cookie.is_none() => (
            Some(prompt_non_empty(prompter, PASSWORD_PROMPT, true)?),
            ValueSource::Prompt,
        ),
        None => (None, ValueSource::Unset),
    };
    let credentials = match (username, password) {
        (Some(username), Some(password)) => Some(Credentials {
            username,
            password: Secret::new(password),
        }),
        _ => None,
    };

    let list_path = overrides
        .list_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIST_FILENAME));
    let fix_dates = if overrides.dates.is_empty() {
        None
    } else {
        let mut dates = Vec::with_capacity(overrides.dates.len());
        for value in &overrides.dates {
            dates.push(parse_puzzle_date(value)?);
        }
        Some(dates)
    };
    if mode == Mode::Fix && fix_dates.is_none() {
        ensure_list_exists(&list_path)?;
    }

    Ok(Settings {
        credentials,
        cookie,
        mode,
        headless,
        months,
        through,
        list_path,
        fix_dates,
        sources: SettingsSources {
            mode: mode_source,
            headless: headless_source,
            months: months_source,
            through: through_source,
            username: username_source,
            password: password_source,
            cookie: cookie_source,
        },
    })
}

fn resolve_mode<F>(
    file: &SettingsFile,
    overrides: &RunOverrides,
    lookup_env: &F,
    prompter: &mut dyn Prompter,
) -> Result<(Mode, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    let configured = pick(
        non_empty(overrides.mode.as_deref()),
        lookup_env("XWRESET_MODE"),
        non_empty(file.run.mode.as_deref()),
    );
    if let Some((value, source)) = configured {
        let mode = Mode::parse(&value)
            .with_context(|| format!("mode from {} is invalid", source.as_str()))?;
        return Ok((mode, source));
    }
    let mode = prompt_parsed(
        prompter,
        "Enter operation mode (scan, fix, both): ",
        Mode::parse,
    )?;
    Ok((mode, ValueSource::Prompt))
}

fn resolve_headless<F>(
    file: &SettingsFile,
    overrides: &RunOverrides,
    lookup_env: &F,
    prompter: &mut dyn Prompter,
) -> Result<(bool, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = non_empty(overrides.headless.as_deref()) {
        return Ok((parse_yes_no(&value).context("invalid --headless")?, ValueSource::Flag));
    }
    if let Some(value) = non_empty(lookup_env("XWRESET_HEADLESS").as_deref()) {
        return Ok((
            parse_yes_no(&value).context("invalid XWRESET_HEADLESS")?,
            ValueSource::Env,
        ));
    }
    if let Some(value) = file.run.headless {
        return Ok((value, ValueSource::File));
    }
    let headless = prompt_parsed(prompter, "Run in headless mode? (y/n): ", parse_yes_no)?;
    Ok((headless, ValueSource::Prompt))
}

fn resolve_months<F>(
    file: &SettingsFile,
    overrides: &RunOverrides,
    lookup_env: &F,
    prompter: &mut dyn Prompter,
) -> Result<(u32, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = overrides.months {
        return Ok((validate_months(value).context("invalid --months")?, ValueSource::Flag));
    }
    if let Some(value) = non_empty(lookup_env("XWRESET_MONTHS").as_deref()) {
        return Ok((parse_months(&value).context("invalid XWRESET_MONTHS")?, ValueSource::Env));
    }
    if let Some(value) = file.run.months {
        return Ok((validate_months(value).context("invalid [run].months")?, ValueSource::File));
    }
    let months = prompt_parsed(
        prompter,
        "How many months back should be scanned? ",
        parse_months,
    )?;
    Ok((months, ValueSource::Prompt))
}

pub fn parse_yes_no(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Ok(true),
        "n" | "no" | "false" | "0" => Ok(false),
        other => bail!("expected y or n, got {other:?}"),
    }
}

pub fn parse_months(value: &str) -> Result<u32> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .with_context(|| format!("months must be a whole number, got {:?}", value.trim()))?;
    validate_months(parsed)
}

fn validate_months(value: i64) -> Result<u32> {
    if value <= 0 {
        bail!("months must be positive, got {value}");
    }
    if value > i64::from(MAX_ARCHIVE_MONTHS) {
        bail!("months must be at most {MAX_ARCHIVE_MONTHS}, got {value}");
    }
    u32::try_from(value).with_context(|| format!("months is too large: {value}"))
}

fn ensure_list_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "date list {} does not exist; run with --mode scan first or pass --date",
            path.display()
        );
    }
    Ok(())
}

fn pick(
    flag: Option<String>,
    env_value: Option<String>,
    file_value: Option<String>,
) -> Option<(String, ValueSource)> {
    if let Some(value) = flag {
        return Some((value, ValueSource::Flag));
    }
    if let Some(value) = non_empty(env_value.as_deref()) {
        return Some((value, ValueSource::Env));
    }
    file_value.map(|value| (value, ValueSource::File))
}

fn prompt_parsed<T>(
    prompter: &mut dyn Prompter,
    question: &str,
    parse: impl Fn(&str) -> Result<T>,
) -> Result<T> {
    let mut last_error = None;
    for _ in 0..PROMPT_ATTEMPTS {
        let answer = prompter.ask(question)?;
        match parse(&answer) {
            Ok(value) => return Ok(value),
            Err(error) => {
                prompter.warn(&format!("{error:#}. Please try again."));
                last_error = Some(error);
            }
        }
    }
    let error = last_error.unwrap_or_else(|| anyhow::anyhow!("no answer given"));
    Err(error).with_context(|| format!("no valid answer after {PROMPT_ATTEMPTS} attempts"))
}

/// Asks for a username and password; used when no cookie can be relied on.
pub(crate) fn prompt_credentials(prompter: &mut dyn Prompter) -> Result<Credentials> {
    let username = prompt_non_empty(prompter, USERNAME_PROMPT, false)?;
    let password = prompt_non_empty(prompter, PASSWORD_PROMPT, true)?;
    Ok(Credentials {
        username,
        password: Secret::new(password),
    })
}

fn prompt_non_empty(prompter: &mut dyn Prompter, question: &str, secret: bool) -> Result<String> {
    let answer = if secret {
        prompter.ask_secret(question)?
    } else {
        prompter.ask(question)?
    };
    non_empty(Some(answer.as_str())).ok_or_else(|| {
        anyhow::anyhow!(
            "{} cannot be empty",
            question.trim().trim_end_matches(':').trim_start_matches("Enter ")
        )
    })
}
