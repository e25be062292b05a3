//! Session bootstrapper: programmatic login and the scenario's cookie/token store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::http::{HttpResponse, OutboundRequest};
use crate::scenario::ScenarioContext;

/// How the login body is encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginEncoding {
    /// `application/x-www-form-urlencoded`, as a regular HTML form posts it
    #[default]
    Form,
    /// JSON body, as an XHR login posts it
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub encoding: LoginEncoding,
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("cypress", "password123")
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            encoding: LoginEncoding::Form,
        }
    }

    pub fn encoding(mut self, encoding: LoginEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn login_request(&self, login_path: &str) -> OutboundRequest {
        let request = OutboundRequest::post(login_path).follow_redirects(false);
        match self.encoding {
            LoginEncoding::Form => request.form([
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ]),
            LoginEncoding::Json => request.json(json!({
                "username": self.username,
                "password": self.password,
            })),
        }
    }
}

/// Opaque authenticated-session credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionToken {
    Cookie { name: String, value: String },
    Bearer { token: String },
}

impl SessionToken {
    pub fn value(&self) -> &str {
        match self {
            SessionToken::Cookie { value, .. } => value,
            SessionToken::Bearer { token } => token,
        }
    }
}

/// Cookie jar and token slot of one scenario.
///
/// Cookies are kept per name only; a scenario talks to a single origin.
#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    token: Option<SessionToken>,
    cookies: BTreeMap<String, String>,
}

impl SessionStore {
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub fn set_token(&mut self, token: SessionToken) {
        if let Some(previous) = self.token.replace(token) {
            debug!("replacing previous session token ({} chars)", previous.value().len());
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Value for an outgoing `Cookie` header
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Apply every `Set-Cookie` header of a response
    pub fn store_set_cookies(&mut self, response: &HttpResponse) {
        for header in response.header_all("set-cookie") {
            if let Some(cookie) = SetCookie::parse(header) {
                if cookie.expired {
                    self.cookies.remove(&cookie.name);
                } else {
                    self.cookies.insert(cookie.name, cookie.value);
                }
            }
        }
    }

    /// Drop the token and the cookie that carried it
    pub fn logout(&mut self) -> Option<SessionToken> {
        let token = self.token.take();
        if let Some(SessionToken::Cookie { name, .. }) = &token {
            self.cookies.remove(name);
        }
        token
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.cookies.clear();
    }
}

#[derive(Debug, PartialEq)]
struct SetCookie {
    name: String,
    value: String,
    expired: bool,
}

impl SetCookie {
    fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut expired = false;
        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            let key = key.trim();
            if key.eq_ignore_ascii_case("max-age") {
                expired = val.trim().parse::<i64>().map(|age| age <= 0).unwrap_or(false);
            } else if key.eq_ignore_ascii_case("expires") {
                if let Ok(at) = DateTime::parse_from_rfc2822(val.trim()) {
                    expired = at.with_timezone(&Utc) <= Utc::now();
                }
            }
        }

        Some(Self {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            expired,
        })
    }
}

fn extract_token(response: &HttpResponse, config: &HarnessConfig) -> Option<SessionToken> {
    let cookie = response
        .header_all("set-cookie")
        .filter_map(SetCookie::parse)
        .find(|c| c.name == config.session_cookie && !c.expired && !c.value.is_empty());
    if let Some(c) = cookie {
        return Some(SessionToken::Cookie {
            name: c.name,
            value: c.value,
        });
    }

    let header = config.session_header.as_deref()?;
    let value = response.header(header)?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value);
    (!token.is_empty()).then(|| SessionToken::Bearer {
        token: token.to_string(),
    })
}

/// Log in by posting credentials straight to the login endpoint.
///
/// The call goes through the scenario pipeline, so stub rules apply to it.
/// On success the token is stored in the scenario and sent with every later
/// request; on failure nothing is stored.
pub async fn authenticate(
    ctx: &ScenarioContext,
    credentials: &Credentials,
) -> HarnessResult<SessionToken> {
    let config = ctx.config();
    let response = ctx
        .request(credentials.login_request(&config.login_path))
        .await?;

    if !(response.is_success() || response.is_redirect()) {
        return Err(HarnessError::Auth {
            status: response.status,
            reason: response.status_line(),
            body: response.body,
        });
    }

    let token = extract_token(&response, config).ok_or_else(|| HarnessError::Auth {
        status: response.status,
        reason: format!("no '{}' session credential in response", config.session_cookie),
        body: response.body.clone(),
    })?;

    info!(
        scenario = ctx.name(),
        "authenticated as '{}' ({:?})", credentials.username, credentials.encoding
    );
    ctx.install_token(token.clone());
    Ok(token)
}
