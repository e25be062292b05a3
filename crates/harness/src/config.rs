//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL that relative request paths are resolved against
    pub base_url: String,

    /// Path of the login endpoint used by the bootstrapper
    pub login_path: String,

    /// Cookie that carries the session
    pub session_cookie: String,

    /// Response header that carries a bearer token, if the app issues one
    pub session_header: Option<String>,

    /// Default timeout for waits and assertions
    pub default_timeout_ms: u64,

    /// Default polling cadence for assertions
    pub poll_interval_ms: u64,

    /// Timeout for a single forwarded HTTP call
    pub request_timeout_ms: u64,

    /// Redirect hops followed before giving up
    pub max_redirects: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8082".to_string(),
            login_path: "/login".to_string(),
            session_cookie: "cypress-session-cookie".to_string(),
            session_header: None,
            default_timeout_ms: 4000,
            poll_interval_ms: 50,
            request_timeout_ms: 10_000,
            max_redirects: 20,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `SESSIONKIT_*` environment overrides
    pub fn with_env_overrides(mut self) -> HarnessResult<Self> {
        if let Ok(url) = std::env::var("SESSIONKIT_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(cookie) = std::env::var("SESSIONKIT_SESSION_COOKIE") {
            self.session_cookie = cookie;
        }
        if let Ok(ms) = std::env::var("SESSIONKIT_TIMEOUT_MS") {
            self.default_timeout_ms = ms
                .parse()
                .map_err(|_| HarnessError::Config(format!("SESSIONKIT_TIMEOUT_MS: '{}'", ms)))?;
        }
        if let Ok(ms) = std::env::var("SESSIONKIT_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms.parse().map_err(|_| {
                HarnessError::Config(format!("SESSIONKIT_POLL_INTERVAL_MS: '{}'", ms))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Builder-style base URL override
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn validate(&self) -> HarnessResult<()> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|_| HarnessError::InvalidUrl(self.base_url.clone()))?;
        if self.poll_interval_ms == 0 {
            return Err(HarnessError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.session_cookie.is_empty() {
            return Err(HarnessError::Config("session_cookie must not be empty".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
