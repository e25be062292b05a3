//! Network stub rules and the per-scenario registry of captured exchanges

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Which HTTP methods a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    Any,
    Exact(Method),
}

impl MethodMatcher {
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodMatcher::Any => true,
            MethodMatcher::Exact(m) => m == method,
        }
    }

    /// `*` or `ANY` matches every method
    pub fn parse(s: &str) -> HarnessResult<Self> {
        match s.trim() {
            "*" | "" => Ok(MethodMatcher::Any),
            other if other.eq_ignore_ascii_case("any") => Ok(MethodMatcher::Any),
            other => Method::from_bytes(other.to_ascii_uppercase().as_bytes())
                .map(MethodMatcher::Exact)
                .map_err(|_| HarnessError::InvalidPattern {
                    pattern: other.to_string(),
                    reason: "not an HTTP method".to_string(),
                }),
        }
    }
}

impl fmt::Display for MethodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodMatcher::Any => write!(f, "*"),
            MethodMatcher::Exact(m) => write!(f, "{}", m),
        }
    }
}

/// Path matcher, applied to the request path without its query string
#[derive(Debug, Clone)]
pub enum PathPattern {
    Exact(String),
    Glob { source: String, regex: Regex },
    Regex(Regex),
}

impl PathPattern {
    pub fn exact(path: impl Into<String>) -> Self {
        PathPattern::Exact(path.into())
    }

    /// `*` matches within one path segment, `**` across segments
    pub fn glob(pattern: &str) -> HarnessResult<Self> {
        let mut re = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            } else {
                re.push_str(&regex::escape(&c.to_string()));
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|e| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(PathPattern::Glob {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn regex(pattern: &str) -> HarnessResult<Self> {
        Regex::new(pattern)
            .map(PathPattern::Regex)
            .map_err(|e| HarnessError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Patterns starting with `^` are regular expressions, patterns containing
    /// `*` are globs, anything else matches exactly.
    pub fn parse(pattern: &str) -> HarnessResult<Self> {
        if pattern.starts_with('^') {
            Self::regex(pattern)
        } else if pattern.contains('*') {
            Self::glob(pattern)
        } else {
            Ok(Self::exact(pattern))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Glob { regex, .. } | PathPattern::Regex(regex) => regex.is_match(path),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(p) => write!(f, "{}", p),
            PathPattern::Glob { source, .. } => write!(f, "{}", source),
            PathPattern::Regex(r) => write!(f, "{}", r.as_str()),
        }
    }
}

/// Scripted response returned instead of contacting the network
#[derive(Debug, Clone, PartialEq)]
pub struct StubResponse {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub delay: Duration,
}

impl StubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: Value::Object(Default::default()),
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Value::String(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wire body and the content type implied by it.
    /// String bodies go out verbatim, everything else as JSON.
    pub(crate) fn encoded_body(&self) -> (String, &'static str) {
        match &self.body {
            Value::String(s) => (s.clone(), "text/plain; charset=utf-8"),
            other => (other.to_string(), "application/json"),
        }
    }
}

/// What a matching rule does with the call
#[derive(Debug, Clone, PartialEq)]
pub enum StubAction {
    Respond(StubResponse),
    Passthrough,
}

/// How many exchanges a rule may match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubScope {
    Once,
    #[default]
    Always,
}

/// An interception rule registered for a scenario
#[derive(Debug, Clone)]
pub struct StubRule {
    pub method: MethodMatcher,
    pub path: PathPattern,
    pub action: StubAction,
    pub scope: StubScope,
    pub alias: Option<String>,
}

impl StubRule {
    /// Passthrough rule with scope `Always`; use the builders to change that
    pub fn new(method: MethodMatcher, path: PathPattern) -> Self {
        Self {
            method,
            path,
            action: StubAction::Passthrough,
            scope: StubScope::Always,
            alias: None,
        }
    }

    /// Rule from textual method and path pattern, e.g. `("POST", "/login")`
    pub fn route(method: &str, path: &str) -> HarnessResult<Self> {
        Ok(Self::new(MethodMatcher::parse(method)?, PathPattern::parse(path)?))
    }

    pub fn respond(mut self, response: StubResponse) -> Self {
        self.action = StubAction::Respond(response);
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.action = StubAction::Passthrough;
        self
    }

    pub fn scope(mut self, scope: StubScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn once(self) -> Self {
        self.scope(StubScope::Once)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.matches(method) && self.path.matches(path)
    }

    fn label(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.method, self.path))
    }
}

/// Handle to a registered rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubHandle {
    pub id: u64,
    pub alias: String,
}

/// One completed request/response pair matched by a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub alias: String,
    pub request_method: String,
    pub request_path: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Value,
    pub response_status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub stubbed: bool,
    pub timestamp: DateTime<Utc>,
}

/// The rule chosen for a call
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub id: u64,
    pub alias: String,
    pub action: StubAction,
}

struct RegisteredRule {
    id: u64,
    alias: String,
    rule: StubRule,
    exhausted: bool,
    waited: usize,
}

/// Per-scenario rule set and exchange log
#[derive(Default)]
pub(crate) struct StubRegistry {
    next_id: u64,
    rules: Vec<RegisteredRule>,
    log: Vec<(u64, CapturedExchange)>,
}

impl StubRegistry {
    pub fn register(&mut self, rule: StubRule) -> StubHandle {
        self.next_id += 1;
        let id = self.next_id;
        let alias = rule.label();
        self.rules.push(RegisteredRule {
            id,
            alias: alias.clone(),
            rule,
            exhausted: false,
            waited: 0,
        });
        StubHandle { id, alias }
    }

    /// Pick the most recently registered live rule matching the call.
    /// A `Once` rule is exhausted by being claimed.
    pub fn claim(&mut self, method: &Method, path: &str) -> Option<Claim> {
        let entry = self
            .rules
            .iter_mut()
            .rev()
            .find(|r| !r.exhausted && r.rule.matches(method, path))?;
        if entry.rule.scope == StubScope::Once {
            entry.exhausted = true;
        }
        Some(Claim {
            id: entry.id,
            alias: entry.alias.clone(),
            action: entry.rule.action.clone(),
        })
    }

    pub fn record(&mut self, id: u64, exchange: CapturedExchange) {
        self.log.push((id, exchange));
    }

    fn rule(&self, id: u64) -> HarnessResult<&RegisteredRule> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(HarnessError::UnknownStub(id))
    }

    pub fn exchanges(&self, id: u64) -> HarnessResult<Vec<CapturedExchange>> {
        self.rule(id)?;
        Ok(self
            .log
            .iter()
            .filter(|(rule, _)| *rule == id)
            .map(|(_, ex)| ex.clone())
            .collect())
    }

    pub fn observed(&self, id: u64) -> usize {
        self.log.iter().filter(|(rule, _)| *rule == id).count()
    }

    /// Next exchange of the rule not yet handed out by a wait
    pub fn take_unwaited(&mut self, id: u64) -> HarnessResult<Option<CapturedExchange>> {
        let waited = self.rule(id)?.waited;
        let next = self
            .log
            .iter()
            .filter(|(rule, _)| *rule == id)
            .nth(waited)
            .map(|(_, ex)| ex.clone());
        if next.is_some() {
            if let Some(entry) = self.rules.iter_mut().find(|r| r.id == id) {
                entry.waited += 1;
            }
        }
        Ok(next)
    }

    pub fn all_exchanges(&self) -> Vec<CapturedExchange> {
        self.log.iter().map(|(_, ex)| ex.clone()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.log.clear();
    }
}
