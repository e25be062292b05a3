//! Declarative YAML scenario specification

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessionkit_harness::LoginEncoding;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Which flavour of the login app the scenario runs against
    #[serde(default)]
    pub app: AppMode,

    /// Upper bound for every wait in the scenario
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,
}

/// Login app flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    #[default]
    Html,
    Xhr,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Html => "html",
            AppMode::Xhr => "xhr",
        }
    }
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Log in programmatically, bypassing the page
    Authenticate {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        encoding: LoginEncoding,
        /// Expect the login to be rejected with this status
        #[serde(default)]
        expect_status: Option<u16>,
    },

    /// Register an interception rule; without `status`/`response` it passes through
    Stub {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        response: Option<Value>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        delay_ms: Option<u64>,
        #[serde(default)]
        once: bool,
    },

    /// Load a page (relative to the base URL)
    Visit { url: String },

    /// Type into a login form field; a trailing `{enter}` submits
    Type { field: String, text: String },

    /// Submit the login form
    Submit,

    /// Replace the page's redirect function with a recording stub
    StubRedirect,

    /// Wait for the next exchange on an aliased rule
    Wait {
        alias: String,
        #[serde(default)]
        request_body: Option<Value>,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert page state, retrying until it holds
    Expect {
        #[serde(default)]
        url_contains: Option<String>,
        #[serde(default)]
        error_visible: Option<bool>,
        #[serde(default)]
        error_contains: Option<String>,
        #[serde(default)]
        text: Option<TextAssertion>,
        #[serde(default)]
        cookie: Option<String>,
        #[serde(default)]
        redirect_called_with: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Issue a request directly and check the response
    Request {
        #[serde(default = "default_request_method")]
        method: String,
        url: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        form: bool,
        #[serde(default = "default_true")]
        follow_redirect: bool,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        redirected_to: Option<String>,
        #[serde(default)]
        body_contains: Option<String>,
    },

    /// Drop the session token and its cookie
    Logout,

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_method() -> String {
    "*".to_string()
}

fn default_request_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// Text of the element matching `selector` must contain `contains`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAssertion {
    pub selector: String,
    pub contains: String,
}

impl ScenarioSpec {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load every scenario in a directory. A file may hold several
    /// YAML documents separated by `---`.
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            for document in serde_yaml::Deserializer::from_str(&content) {
                let spec = Self::deserialize(document)
                    .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
                specs.push(spec);
            }
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }
}
