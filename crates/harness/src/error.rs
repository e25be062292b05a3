//! Error types for the session harness

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Authentication failed with status {status}: {reason}")]
    Auth {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Timed out after {timeout:?} waiting for an exchange on '{alias}' ({observed} recorded)")]
    Timeout {
        alias: String,
        timeout: Duration,
        observed: usize,
    },

    #[error("Assertion '{description}' not satisfied after {timeout:?} ({attempts} attempts), last observed: {last_observed}")]
    AssertionTimeout {
        description: String,
        timeout: Duration,
        attempts: u32,
        last_observed: String,
        last_error: Option<String>,
    },

    #[error("Predicate '{description}' failed on every attempt ({attempts}): {source}")]
    Predicate {
        description: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Forwarded call for stub '{rule}' failed: {source}")]
    Forward {
        rule: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("Unknown stub handle: {0}")]
    UnknownStub(u64),

    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Form encoding error: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            HarnessError::Auth { status, .. } => Some(*status),
            HarnessError::Forward { source, .. } => source.status(),
            HarnessError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for the two timeout flavours (exchange wait and assertion)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HarnessError::Timeout { .. } | HarnessError::AssertionTimeout { .. }
        )
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
