//! Executes scenario steps against a scenario context and its page

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessionkit_harness::{
    Credentials, HarnessError, Method, OutboundRequest, ScenarioContext, StubHandle, StubResponse,
    StubRule, WaitCondition,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::page::Page;
use crate::spec::{ScenarioStep, TextAssertion};

/// Result of executing a scenario step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Runs the steps of one scenario, keeping aliases and the page between them
pub struct StepExecutor {
    ctx: ScenarioContext,
    page: Page,
    aliases: HashMap<String, StubHandle>,
}

impl StepExecutor {
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            page: Page::new(ctx.clone()),
            ctx,
            aliases: HashMap::new(),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Execute a single step; failures are reported in the result
    pub async fn execute_step(&mut self, step: &ScenarioStep) -> StepResult {
        let start = Instant::now();
        let step_name = step_name(step);

        debug!("Executing step: {}", step_name);

        let result = match step {
            ScenarioStep::Authenticate {
                username,
                password,
                encoding,
                expect_status,
            } => {
                let defaults = Credentials::default();
                let credentials = Credentials::new(
                    username.clone().unwrap_or(defaults.username),
                    password.clone().unwrap_or(defaults.password),
                )
                .encoding(*encoding);
                self.execute_authenticate(&credentials, *expect_status).await
            }
            ScenarioStep::Stub {
                method,
                url,
                alias,
                status,
                response,
                headers,
                delay_ms,
                once,
            } => {
                let scripted = if status.is_some() || response.is_some() {
                    let mut stub = StubResponse::new(status.unwrap_or(200))
                        .json(response.clone().unwrap_or_else(|| Value::Object(Default::default())))
                        .delay(Duration::from_millis(delay_ms.unwrap_or(0)));
                    for (name, value) in headers {
                        stub = stub.header(name, value);
                    }
                    Some(stub)
                } else {
                    None
                };
                self.execute_stub(method, url, alias.as_deref(), scripted, *once)
            }
            ScenarioStep::Visit { url } => self.page.visit(url).await.map(|_| ()),
            ScenarioStep::Type { field, text } => self.page.type_into(field, text).await,
            ScenarioStep::Submit => self.page.submit().await,
            ScenarioStep::StubRedirect => {
                self.page.stub_redirect();
                Ok(())
            }
            ScenarioStep::Wait {
                alias,
                request_body,
                status,
                timeout_ms,
            } => {
                self.execute_wait(alias, request_body.as_ref(), *status, *timeout_ms)
                    .await
            }
            ScenarioStep::Expect {
                url_contains,
                error_visible,
                error_contains,
                text,
                cookie,
                redirect_called_with,
                timeout_ms,
            } => {
                let expectation = Expectation {
                    url_contains: url_contains.clone(),
                    error_visible: *error_visible,
                    error_contains: error_contains.clone(),
                    text: text.clone(),
                    cookie: cookie.clone(),
                    redirect_called_with: redirect_called_with.clone(),
                };
                self.execute_expect(expectation, *timeout_ms).await
            }
            ScenarioStep::Request {
                method,
                url,
                body,
                form,
                follow_redirect,
                status,
                redirected_to,
                body_contains,
            } => {
                let request = RequestCheck {
                    method,
                    url,
                    body: body.as_ref(),
                    form: *form,
                    follow_redirect: *follow_redirect,
                    status: *status,
                    redirected_to: redirected_to.as_deref(),
                    body_contains: body_contains.as_deref(),
                };
                self.execute_request(request).await
            }
            ScenarioStep::Logout => {
                self.ctx.logout();
                Ok(())
            }
            ScenarioStep::Log { message } => {
                info!("[SCENARIO LOG] {}", message);
                Ok(())
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => StepResult {
                success: true,
                step_name,
                duration_ms,
                error: None,
            },
            Err(e) => StepResult {
                success: false,
                step_name,
                duration_ms,
                error: Some(e.to_string()),
            },
        }
    }

    async fn execute_authenticate(
        &self,
        credentials: &Credentials,
        expect_status: Option<u16>,
    ) -> E2eResult<()> {
        match (self.ctx.authenticate(credentials).await, expect_status) {
            (Ok(_), None) => Ok(()),
            (Ok(_), Some(status)) => Err(E2eError::AssertionFailed(format!(
                "login as '{}' succeeded, expected {}",
                credentials.username, status
            ))),
            (Err(HarnessError::Auth { status, .. }), Some(expected)) if status == expected => Ok(()),
            (Err(e), _) => Err(e.into()),
        }
    }

    fn execute_stub(
        &mut self,
        method: &str,
        url: &str,
        alias: Option<&str>,
        response: Option<StubResponse>,
        once: bool,
    ) -> E2eResult<()> {
        let mut rule = StubRule::route(method, url)?;
        if let Some(response) = response {
            rule = rule.respond(response);
        }
        if once {
            rule = rule.once();
        }
        if let Some(alias) = alias {
            rule = rule.alias(alias);
        }

        let handle = self.ctx.register_stub(rule);
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), handle);
        }
        Ok(())
    }

    async fn execute_wait(
        &self,
        alias: &str,
        request_body: Option<&Value>,
        status: Option<u16>,
        timeout_ms: Option<u64>,
    ) -> E2eResult<()> {
        let handle = self
            .aliases
            .get(alias)
            .ok_or_else(|| E2eError::UnknownAlias(alias.to_string()))?;
        let exchange = match timeout_ms {
            Some(ms) => self.ctx.wait_for(handle, Duration::from_millis(ms)).await?,
            None => self.ctx.wait(handle).await?,
        };

        if let Some(expected) = request_body {
            if &exchange.request_body != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "'{}' request body was {}, expected {}",
                    alias, exchange.request_body, expected
                )));
            }
        }
        if let Some(expected) = status {
            if exchange.response_status != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "'{}' answered {}, expected {}",
                    alias, exchange.response_status, expected
                )));
            }
        }
        Ok(())
    }

    async fn execute_expect(&self, expectation: Expectation, timeout_ms: Option<u64>) -> E2eResult<()> {
        let description = expectation.describe();
        let page = self.page.clone();
        let predicate = || {
            let holds = expectation.holds(&page);
            async move { holds }
        };

        let result = match timeout_ms {
            Some(ms) => {
                let condition = WaitCondition::new(
                    Duration::from_millis(ms),
                    self.ctx.config().poll_interval(),
                );
                self.ctx
                    .expect_eventually_within(&description, predicate, condition)
                    .await
            }
            None => self.ctx.expect_eventually(&description, predicate).await,
        };

        result.map_err(|e| match e {
            HarnessError::AssertionTimeout { .. } => {
                E2eError::AssertionFailed(format!("{} (page: {})", e, expectation.observed(&page)))
            }
            other => other.into(),
        })
    }

    async fn execute_request(&self, check: RequestCheck<'_>) -> E2eResult<()> {
        let method = Method::from_bytes(check.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            E2eError::StepFailed {
                step: format!("request:{}", check.url),
                reason: format!("invalid method '{}'", check.method),
            }
        })?;

        let mut request = OutboundRequest::new(method, check.url).follow_redirects(check.follow_redirect);
        if let Some(body) = check.body {
            request = if check.form {
                request.form(form_fields(body))
            } else {
                request.json(body.clone())
            };
        }

        let response = self.ctx.request(request).await?;

        if let Some(expected) = check.status {
            if response.status != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "{} answered {}, expected {}",
                    check.url, response.status, expected
                )));
            }
        }
        if let Some(expected) = check.redirected_to {
            let expected = self.ctx.resolve(expected)?.to_string();
            if response.redirected_to.as_deref() != Some(expected.as_str()) {
                return Err(E2eError::AssertionFailed(format!(
                    "{} redirected to {:?}, expected {}",
                    check.url, response.redirected_to, expected
                )));
            }
        }
        if let Some(needle) = check.body_contains {
            if !response.body.contains(needle) {
                return Err(E2eError::AssertionFailed(format!(
                    "{} body does not include '{}'",
                    check.url, needle
                )));
            }
        }
        Ok(())
    }
}

/// Generate a display name for a step
fn step_name(step: &ScenarioStep) -> String {
    match step {
        ScenarioStep::Authenticate { username, .. } => {
            format!("authenticate:{}", username.as_deref().unwrap_or("default"))
        }
        ScenarioStep::Stub { method, url, alias, .. } => match alias {
            Some(alias) => format!("stub:{} {} as {}", method, url, alias),
            None => format!("stub:{} {}", method, url),
        },
        ScenarioStep::Visit { url } => format!("visit:{}", url),
        ScenarioStep::Type { field, .. } => format!("type:{}", field),
        ScenarioStep::Submit => "submit".to_string(),
        ScenarioStep::StubRedirect => "stub_redirect".to_string(),
        ScenarioStep::Wait { alias, .. } => format!("wait:@{}", alias),
        ScenarioStep::Expect { .. } => "expect".to_string(),
        ScenarioStep::Request { method, url, .. } => format!("request:{} {}", method, url),
        ScenarioStep::Logout => "logout".to_string(),
        ScenarioStep::Log { message } => {
            format!("log:{}", message.chars().take(30).collect::<String>())
        }
    }
}

/// Flatten a JSON object into form fields
fn form_fields(body: &Value) -> Vec<(String, String)> {
    match body {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => Vec::new(),
    }
}

struct RequestCheck<'a> {
    method: &'a str,
    url: &'a str,
    body: Option<&'a Value>,
    form: bool,
    follow_redirect: bool,
    status: Option<u16>,
    redirected_to: Option<&'a str>,
    body_contains: Option<&'a str>,
}

/// Page assertions of one `expect` step; all of them must hold at once
#[derive(Debug, Clone, Default)]
struct Expectation {
    url_contains: Option<String>,
    error_visible: Option<bool>,
    error_contains: Option<String>,
    text: Option<TextAssertion>,
    cookie: Option<String>,
    redirect_called_with: Option<String>,
}

impl Expectation {
    fn holds(&self, page: &Page) -> bool {
        if let Some(fragment) = &self.url_contains {
            if !page.url().contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(visible) = self.error_visible {
            if page.error_visible() != visible {
                return false;
            }
        }
        if let Some(needle) = &self.error_contains {
            if !page.error_visible()
                || !page.error_text().unwrap_or_default().contains(needle.as_str())
            {
                return false;
            }
        }
        if let Some(assertion) = &self.text {
            let text = page.text(&assertion.selector).unwrap_or_default();
            if !text.contains(assertion.contains.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.cookie {
            if page.cookie(name).is_none() {
                return false;
            }
        }
        if let Some(target) = &self.redirect_called_with {
            if !page.redirect_calls().iter().any(|c| c == target) {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(fragment) = &self.url_contains {
            parts.push(format!("url includes '{}'", fragment));
        }
        if let Some(visible) = self.error_visible {
            parts.push(format!("p.error visible = {}", visible));
        }
        if let Some(needle) = &self.error_contains {
            parts.push(format!("p.error contains '{}'", needle));
        }
        if let Some(assertion) = &self.text {
            parts.push(format!("{} contains '{}'", assertion.selector, assertion.contains));
        }
        if let Some(name) = &self.cookie {
            parts.push(format!("cookie '{}' exists", name));
        }
        if let Some(target) = &self.redirect_called_with {
            parts.push(format!("redirect called with '{}'", target));
        }
        if parts.is_empty() {
            "page loaded".to_string()
        } else {
            parts.join(" and ")
        }
    }

    fn observed(&self, page: &Page) -> String {
        format!(
            "url={} error={:?} visible={} heading={:?} redirects={:?}",
            page.url(),
            page.error_text(),
            page.error_visible(),
            page.heading(),
            page.redirect_calls()
        )
    }
}
