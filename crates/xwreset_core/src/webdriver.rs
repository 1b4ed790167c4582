//! Minimal blocking W3C WebDriver client (chromedriver, geckodriver).
//!
//! Only the commands the scan/fix workflow needs are wrapped. Every command
//! returns the protocol's `value` member; protocol errors keep their W3C
//! error code so callers can tell a missing element from a dead session.

use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Method;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Key under which W3C drivers return element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
pub const NO_SUCH_ELEMENT: &str = "no such element";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Firefox,
}

impl Browser {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("chrome") || value.eq_ignore_ascii_case("chromium") {
            return Ok(Self::Chrome);
        }
        if value.eq_ignore_ascii_case("firefox") {
            return Ok(Self::Firefox);
        }
        bail!("unsupported browser: {value} (expected chrome|firefox)")
    }
}

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub url: String,
    pub browser: Browser,
    pub headless: bool,
    pub page_load_timeout_ms: u64,
    pub element_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub http_timeout_ms: u64,
}

impl WebDriverConfig {
    pub fn new(url: impl Into<String>, browser: Browser, headless: bool) -> Self {
        Self {
            url: url.into(),
            browser,
            headless,
            page_load_timeout_ms: 30_000,
            element_timeout_ms: 10_000,
            poll_interval_ms: 250,
            http_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    pub(crate) fn strategy(self) -> (&'static str, String) {
        match self {
            Self::Css(value) => ("css selector", value.to_string()),
            Self::XPath(value) => ("xpath", value.to_string()),
        }
    }
}

/// Opaque reference to an element in the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

/// W3C error payload carried inside `value` on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDriverError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for WebDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebDriver error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for WebDriverError {}

pub struct WebDriverSession {
    client: Client,
    config: WebDriverConfig,
    session_id: String,
    request_count: usize,
    closed: bool,
}

impl WebDriverSession {
    /// Starts a browser through the WebDriver server and applies the page-load timeout.
    pub fn start(config: WebDriverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .context("failed to build WebDriver HTTP client")?;

        let mut session = Self {
            client,
            config,
            session_id: String::new(),
            request_count: 0,
            closed: false,
        };
        let capabilities = capabilities(session.config.browser, session.config.headless);
        let value = session
            .command(Method::POST, "session", Some(capabilities))
            .with_context(|| {
                format!(
                    "failed to start a browser session at {}",
                    session.config.url
                )
            })?;
        session.session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("WebDriver new-session response has no sessionId"))?;
        debug!(session_id = %session.session_id, headless = session.config.headless, "browser session started");

        let page_load = session.config.page_load_timeout_ms;
        session
            .session_command(
                Method::POST,
                "timeouts",
                Some(json!({ "pageLoad": page_load, "implicit": 0 })),
            )
            .context("failed to set page load timeout")?;
        Ok(session)
    }

    pub fn config(&self) -> &WebDriverConfig {
        &self.config
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url, "navigate");
        self.session_command(Method::POST, "url", Some(json!({ "url": url })))
            .with_context(|| format!("failed to load {url}"))?;
        Ok(())
    }

    pub fn find(&mut self, locator: Locator<'_>) -> Result<ElementRef> {
        let value = self.session_command(Method::POST, "element", Some(locator_body(locator)))?;
        element_from_value(&value)
    }

    pub fn find_all(&mut self, locator: Locator<'_>) -> Result<Vec<ElementRef>> {
        let value = self.session_command(Method::POST, "elements", Some(locator_body(locator)))?;
        elements_from_value(&value)
    }

    pub fn find_all_within(
        &mut self,
        parent: &ElementRef,
        locator: Locator<'_>,
    ) -> Result<Vec<ElementRef>> {
        let path = format!("element/{}/elements", parent.id());
        let value = self.session_command(Method::POST, &path, Some(locator_body(locator)))?;
        elements_from_value(&value)
    }

    /// Polls until the element exists or the element timeout elapses.
    pub fn wait_for(&mut self, locator: Locator<'_>) -> Result<ElementRef> {
        let timeout = Duration::from_millis(self.config.element_timeout_ms);
        self.wait_for_within(locator, timeout)
    }

    pub fn wait_for_within(&mut self, locator: Locator<'_>, timeout: Duration) -> Result<ElementRef> {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            match self.find(locator) {
                Ok(element) => return Ok(element),
                Err(error) if is_no_such_element(&error) => {
                    if Instant::now() >= deadline {
                        return Err(error).with_context(|| {
                            format!(
                                "timed out after {}ms waiting for {locator:?}",
                                timeout.as_millis()
                            )
                        });
                    }
                    sleep(poll);
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub fn text(&mut self, element: &ElementRef) -> Result<String> {
        let path = format!("element/{}/text", element.id());
        let value = self.session_command(Method::GET, &path, None)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub fn attribute(&mut self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let path = format!("element/{}/attribute/{name}", element.id());
        let value = self.session_command(Method::GET, &path, None)?;
        Ok(value.as_str().map(ToString::to_string))
    }

    pub fn click(&mut self, element: &ElementRef) -> Result<()> {
        let path = format!("element/{}/click", element.id());
        self.session_command(Method::POST, &path, Some(json!({})))?;
        Ok(())
    }

    /// Adds a cookie for the current document's domain; navigate to the site first.
    pub fn add_cookie(&mut self, cookie: &CookieSpec) -> Result<()> {
        let body = json!({ "cookie": cookie });
        self.session_command(Method::POST, "cookie", Some(body))
            .with_context(|| format!("failed to add cookie {}", cookie.name))?;
        Ok(())
    }

    pub fn delete_cookie(&mut self, name: &str) -> Result<()> {
        self.session_command(Method::DELETE, &format!("cookie/{name}"), None)?;
        Ok(())
    }

    pub fn quit(&mut self) -> Result<()> {
        if self.closed || self.session_id.is_empty() {
            return Ok(());
        }
        self.closed = true;
        let path = format!("session/{}", self.session_id);
        self.command(Method::DELETE, &path, None)
            .context("failed to close browser session")?;
        debug!(session_id = %self.session_id, "browser session closed");
        Ok(())
    }

    fn session_command(&mut self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        if self.closed {
            bail!("browser session is already closed");
        }
        let full = format!("session/{}/{path}", self.session_id);
        self.command(method, &full, body)
    }

    fn command(&mut self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        self.request_count += 1;
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .with_context(|| format!("failed to reach WebDriver at {url}"))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode WebDriver response ({status}) for {method} {path}"))?;

        if let Some(error) = protocol_error(&payload) {
            return Err(error.into());
        }
        if !status.is_success() {
            bail!("WebDriver request {method} {path} failed with HTTP {status}");
        }
        Ok(payload.get("value").cloned().unwrap_or(Value::Null))
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Err(error) = self.quit() {
            warn!("{error:#}");
        }
    }
}

pub fn capabilities(browser: Browser, headless: bool) -> Value {
    match browser {
        Browser::Chrome => {
            let mut args = vec!["--window-size=1280,1024"];
            if headless {
                args.push("--headless=new");
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "goog:chromeOptions": { "args": args }
                    }
                }
            })
        }
        Browser::Firefox => {
            let args: Vec<&str> = if headless { vec!["-headless"] } else { Vec::new() };
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "moz:firefoxOptions": { "args": args }
                    }
                }
            })
        }
    }
}

pub fn is_no_such_element(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<WebDriverError>())
        .any(|cause| cause.code == NO_SUCH_ELEMENT)
}

fn locator_body(locator: Locator<'_>) -> Value {
    let (using, value) = locator.strategy();
    json!({ "using": using, "value": value })
}

fn protocol_error(payload: &Value) -> Option<WebDriverError> {
    let value = payload.get("value")?;
    let code = value.get("error")?.as_str()?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message")
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    Some(WebDriverError {
        code: code.to_string(),
        message,
    })
}

fn element_from_value(value: &Value) -> Result<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| anyhow::anyhow!("WebDriver returned a malformed element reference"))
}

fn elements_from_value(value: &Value) -> Result<Vec<ElementRef>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("WebDriver returned a non-array element list"))?;
    items.iter().map(element_from_value).collect()
}
