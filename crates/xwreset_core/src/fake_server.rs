//! Minimal HTTP/1.1 servers for tests: a generic request/response hook and a
//! scripted W3C WebDriver endpoint.
//!
//! The WebDriver fake does not evaluate selectors. Each page maps the exact
//! locator strings the code asks for to element ids, which is enough to drive
//! `BrowserSite` through archive, puzzle and reset flows.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::webdriver::{
    Browser, ELEMENT_KEY, Locator, NO_SUCH_ELEMENT, WebDriverConfig, WebDriverSession,
};

pub(crate) const FAKE_SESSION_ID: &str = "fake-session";

#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Starts a server in a background thread and returns its base URL
/// (e.g. "http://127.0.0.1:12345"). The server runs until the process exits.
pub(crate) fn serve<F>(handler: F) -> String
where
    F: Fn(&HttpRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let handler = Arc::new(handler);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let handler = Arc::clone(&handler);
            thread::spawn(move || handle(stream, handler.as_ref()));
        }
    });
    format!("http://127.0.0.1:{port}")
}

fn handle<F>(stream: TcpStream, handler: &F)
where
    F: Fn(&HttpRequest) -> (u16, String),
{
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let Some(request) = read_request(&mut reader) else {
        return;
    };
    let (status, body) = handler(&request);
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        reason(status),
        body.len()
    );
    let _ = writer.write_all(response.as_bytes());
    let _ = writer.flush();
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<HttpRequest> {
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;
    Some(HttpRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

type LocatorKey = (String, String);

fn locator_key(locator: Locator<'_>) -> LocatorKey {
    let (using, value) = locator.strategy();
    (using.to_string(), value)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeElement {
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub children: HashMap<LocatorKey, Vec<String>>,
}

/// Scripted browser state shared with the server thread.
#[derive(Debug, Default)]
pub(crate) struct DriverState {
    pages: HashMap<String, HashMap<LocatorKey, Vec<String>>>,
    delays: HashMap<(String, LocatorKey), usize>,
    elements: HashMap<String, FakeElement>,
    click_effects: HashMap<String, Vec<(String, LocatorKey)>>,
    broken_urls: Vec<String>,
    current_url: Option<String>,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub cookies: Vec<Value>,
    pub deleted_cookies: Vec<String>,
    pub capabilities: Option<Value>,
    pub timeouts: Option<Value>,
    pub sessions_deleted: usize,
    pub element_queries: usize,
}

impl DriverState {
    pub fn element(&mut self, id: &str, text: &str, attributes: &[(&str, &str)]) -> &mut Self {
        let element = self.elements.entry(id.to_string()).or_default();
        element.text = text.to_string();
        element.attributes = attributes
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self
    }

    pub fn on_page(&mut self, url: &str, locator: Locator<'_>, ids: &[&str]) -> &mut Self {
        self.pages
            .entry(url.to_string())
            .or_default()
            .entry(locator_key(locator))
            .or_default()
            .extend(ids.iter().map(ToString::to_string));
        self
    }

    pub fn within(&mut self, parent: &str, locator: Locator<'_>, ids: &[&str]) -> &mut Self {
        self.elements
            .entry(parent.to_string())
            .or_default()
            .children
            .entry(locator_key(locator))
            .or_default()
            .extend(ids.iter().map(ToString::to_string));
        self
    }

    /// The locator finds nothing on `url` for the first `misses` lookups.
    pub fn appears_after(&mut self, url: &str, locator: Locator<'_>, misses: usize) -> &mut Self {
        self.delays
            .insert((url.to_string(), locator_key(locator)), misses);
        self
    }

    /// Clicking `clicked` removes the `locator` children of `parent`.
    pub fn click_removes(&mut self, clicked: &str, parent: &str, locator: Locator<'_>) -> &mut Self {
        self.click_effects
            .entry(clicked.to_string())
            .or_default()
            .push((parent.to_string(), locator_key(locator)));
        self
    }

    /// Navigating to `url` fails with a page-load timeout.
    pub fn broken(&mut self, url: &str) -> &mut Self {
        self.broken_urls.push(url.to_string());
        self
    }

    fn find(&mut self, key: &LocatorKey) -> Vec<String> {
        self.element_queries += 1;
        let url = self.current_url.clone().unwrap_or_default();
        if let Some(remaining) = self.delays.get_mut(&(url.clone(), key.clone()))
            && *remaining > 0
        {
            *remaining -= 1;
            return Vec::new();
        }
        self.pages
            .get(&url)
            .and_then(|page| page.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) struct FakeWebDriver {
    url: String,
    state: Arc<Mutex<DriverState>>,
}

impl FakeWebDriver {
    pub fn start(state: DriverState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let shared = Arc::clone(&state);
        let url = serve(move |request| {
            let mut state = shared.lock().expect("driver state");
            let (status, payload) = route(&mut state, request);
            (status, payload.to_string())
        });
        Self { url, state }
    }

    pub fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().expect("driver state")
    }

    /// Short timeouts so waits for absent elements finish quickly.
    pub fn config(&self) -> WebDriverConfig {
        let mut config = WebDriverConfig::new(self.url.clone(), Browser::Chrome, true);
        config.element_timeout_ms = 300;
        config.poll_interval_ms = 10;
        config.http_timeout_ms = 5_000;
        config
    }

    pub fn session(&self) -> WebDriverSession {
        WebDriverSession::start(self.config()).expect("start fake session")
    }
}

fn ok(value: Value) -> (u16, Value) {
    (200, json!({ "value": value }))
}

fn protocol_error(status: u16, code: &str, message: &str) -> (u16, Value) {
    (
        status,
        json!({ "value": { "error": code, "message": message, "stacktrace": "" } }),
    )
}

fn element_json(id: &str) -> Value {
    json!({ ELEMENT_KEY: id })
}

fn route(state: &mut DriverState, request: &HttpRequest) -> (u16, Value) {
    let body: Value = serde_json::from_str(&request.body).unwrap_or(Value::Null);
    let path = request.path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').collect();
    match (request.method.as_str(), segments.as_slice()) {
        ("POST", ["session"]) => {
            state.capabilities = Some(body);
            ok(json!({ "sessionId": FAKE_SESSION_ID, "capabilities": {} }))
        }
        ("DELETE", ["session", _]) => {
            state.sessions_deleted += 1;
            ok(Value::Null)
        }
        (method, ["session", _, rest @ ..]) => session_route(state, method, rest, body),
        _ => protocol_error(404, "unknown command", &request.path),
    }
}

fn session_route(state: &mut DriverState, method: &str, rest: &[&str], body: Value) -> (u16, Value) {
    let body_key = || -> LocatorKey {
        (
            body["using"].as_str().unwrap_or_default().to_string(),
            body["value"].as_str().unwrap_or_default().to_string(),
        )
    };
    match (method, rest) {
        ("POST", ["timeouts"]) => {
            state.timeouts = Some(body.clone());
            ok(Value::Null)
        }
        ("POST", ["url"]) => {
            let url = body["url"].as_str().unwrap_or_default().to_string();
            if state.broken_urls.contains(&url) {
                return protocol_error(500, "timeout", "timeout: Timed out receiving message from renderer");
            }
            state.navigations.push(url.clone());
            state.current_url = Some(url);
            ok(Value::Null)
        }
        ("POST", ["element"]) => {
            let key = body_key();
            match state.find(&key).first() {
                Some(id) => ok(element_json(id)),
                None => protocol_error(404, NO_SUCH_ELEMENT, &format!("no such element: {}", key.1)),
            }
        }
        ("POST", ["elements"]) => {
            let key = body_key();
            let ids = state.find(&key);
            ok(Value::Array(ids.iter().map(|id| element_json(id)).collect()))
        }
        ("POST", ["element", id, "elements"]) => {
            let key = body_key();
            match state.elements.get(*id) {
                Some(element) => {
                    let ids = element.children.get(&key).cloned().unwrap_or_default();
                    ok(Value::Array(ids.iter().map(|id| element_json(id)).collect()))
                }
                None => protocol_error(404, "stale element reference", id),
            }
        }
        ("GET", ["element", id, "text"]) => match state.elements.get(*id) {
            Some(element) => ok(Value::String(element.text.clone())),
            None => protocol_error(404, "stale element reference", id),
        },
        ("GET", ["element", id, "attribute", name]) => match state.elements.get(*id) {
            Some(element) => ok(element
                .attributes
                .get(*name)
                .map(|value| Value::String(value.clone()))
                .unwrap_or(Value::Null)),
            None => protocol_error(404, "stale element reference", id),
        },
        ("POST", ["element", id, "click"]) => {
            state.clicks.push(id.to_string());
            let effects = state.click_effects.get(*id).cloned().unwrap_or_default();
            for (parent, key) in effects {
                if let Some(element) = state.elements.get_mut(&parent) {
                    element.children.remove(&key);
                }
            }
            ok(Value::Null)
        }
        ("POST", ["cookie"]) => {
            state.cookies.push(body["cookie"].clone());
            ok(Value::Null)
        }
        ("DELETE", ["cookie", name]) => {
            state.deleted_cookies.push(name.to_string());
            ok(Value::Null)
        }
        _ => protocol_error(404, "unknown command", &rest.join("/")),
    }
}
