//! Scenario lifecycle and the explicit per-scenario context
//!
//! Every harness call goes through a [`ScenarioContext`]. The context owns the
//! scenario's stub registry, exchange log and session store; a fresh one is
//! handed out by [`Harness::on_scenario_start`] and wiped by
//! [`Harness::on_scenario_end`].

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::http::{HttpResponse, OutboundRequest, RequestBody, TransportRequest};
use crate::session::{self, Credentials, SessionStore, SessionToken};
use crate::stub::{CapturedExchange, Claim, StubAction, StubHandle, StubRegistry, StubResponse, StubRule};
use crate::transport::{ReqwestTransport, Transport};
use crate::wait::{self, WaitCondition};

/// Entry point: hands out isolated scenario contexts sharing one transport
#[derive(Clone)]
pub struct Harness {
    config: HarnessConfig,
    transport: Arc<dyn Transport>,
}

impl Harness {
    pub fn new(config: HarnessConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Harness talking to the real network through reqwest
    pub fn with_reqwest(config: HarnessConfig) -> HarnessResult<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Start a scenario with an empty stub registry, token slot and exchange log
    pub fn on_scenario_start(&self, name: impl Into<String>) -> HarnessResult<ScenarioContext> {
        let name = name.into();
        let base_url = Url::parse(&self.config.base_url)
            .map_err(|_| HarnessError::InvalidUrl(self.config.base_url.clone()))?;
        info!(scenario = %name, "scenario started against {}", base_url);

        Ok(ScenarioContext {
            inner: Arc::new(Inner {
                name,
                config: self.config.clone(),
                base_url,
                transport: self.transport.clone(),
                state: Mutex::new(ScenarioState::default()),
                exchange_recorded: Notify::new(),
                started: Instant::now(),
            }),
        })
    }

    /// Finish a scenario: report what it saw, then reset all of its state
    pub fn on_scenario_end(&self, ctx: &ScenarioContext) -> ScenarioReport {
        let report = ctx.report();
        ctx.reset();
        info!(
            scenario = %report.name,
            "scenario ended after {} ms ({} exchanges)",
            report.duration_ms,
            report.exchanges.len()
        );
        report
    }
}

/// Summary of a finished scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub duration_ms: u64,
    pub stub_rules: usize,
    pub authenticated: bool,
    pub exchanges: Vec<CapturedExchange>,
}

#[derive(Default)]
struct ScenarioState {
    stubs: StubRegistry,
    session: SessionStore,
    deadline: Option<Instant>,
    /// Bumped by every reset; requests started earlier no longer write back
    generation: u64,
}

struct Inner {
    name: String,
    config: HarnessConfig,
    base_url: Url,
    transport: Arc<dyn Transport>,
    state: Mutex<ScenarioState>,
    exchange_recorded: Notify,
    started: Instant,
}

/// Handle to one running scenario. Cloning shares the same scenario.
#[derive(Clone)]
pub struct ScenarioContext {
    inner: Arc<Inner>,
}

impl ScenarioContext {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Resolve a relative path against the base URL
    pub fn resolve(&self, url: &str) -> HarnessResult<Url> {
        self.inner
            .base_url
            .join(url)
            .map_err(|_| HarnessError::InvalidUrl(url.to_string()))
    }

    /// Cap every later wait in this scenario at `timeout` from now
    pub fn set_deadline(&self, timeout: Duration) {
        self.inner.state.lock().deadline = Some(Instant::now() + timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.state.lock().deadline
    }

    /// Default wait parameters, clamped to the scenario deadline
    pub fn wait_condition(&self) -> WaitCondition {
        WaitCondition::new(
            self.inner.config.default_timeout(),
            self.inner.config.poll_interval(),
        )
        .clamp_to(self.deadline())
    }

    // --- session bootstrapper ---

    pub async fn authenticate(&self, credentials: &Credentials) -> HarnessResult<SessionToken> {
        session::authenticate(self, credentials).await
    }

    pub(crate) fn install_token(&self, token: SessionToken) {
        self.inner.state.lock().session.set_token(token);
    }

    pub fn session_token(&self) -> Option<SessionToken> {
        self.inner.state.lock().session.token().cloned()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.inner.state.lock().session.cookie(name).map(str::to_string)
    }

    /// Forget the session token and its cookie
    pub fn logout(&self) -> Option<SessionToken> {
        let token = self.inner.state.lock().session.logout();
        if token.is_some() {
            info!(scenario = %self.inner.name, "logged out");
        }
        token
    }

    // --- network stub controller ---

    pub fn register_stub(&self, rule: StubRule) -> StubHandle {
        let handle = self.inner.state.lock().stubs.register(rule);
        debug!(scenario = %self.inner.name, "registered stub '{}'", handle.alias);
        handle
    }

    /// Exchanges recorded so far for a rule
    pub fn exchanges(&self, handle: &StubHandle) -> HarnessResult<Vec<CapturedExchange>> {
        self.inner.state.lock().stubs.exchanges(handle.id)
    }

    /// Every exchange recorded in this scenario, in completion order
    pub fn all_exchanges(&self) -> Vec<CapturedExchange> {
        self.inner.state.lock().stubs.all_exchanges()
    }

    /// Wait for the rule's next exchange using the default timeout
    pub async fn wait(&self, handle: &StubHandle) -> HarnessResult<CapturedExchange> {
        self.wait_for(handle, self.inner.config.default_timeout()).await
    }

    /// Wait for the rule's next exchange not yet returned by an earlier wait
    pub async fn wait_for(
        &self,
        handle: &StubHandle,
        timeout: Duration,
    ) -> HarnessResult<CapturedExchange> {
        let condition = WaitCondition::new(timeout, self.inner.config.poll_interval())
            .clamp_to(self.deadline());
        let start = Instant::now();
        let deadline = condition.deadline_from(start);

        loop {
            let notified = self.inner.exchange_recorded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(exchange) = self.inner.state.lock().stubs.take_unwaited(handle.id)? {
                return Ok(exchange);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut state = self.inner.state.lock();
                if let Some(exchange) = state.stubs.take_unwaited(handle.id)? {
                    return Ok(exchange);
                }
                let observed = state.stubs.observed(handle.id);
                warn!(scenario = %self.inner.name, "no exchange on '{}'", handle.alias);
                return Err(HarnessError::Timeout {
                    alias: handle.alias.clone(),
                    timeout: deadline - start,
                    observed,
                });
            }
        }
    }

    // --- assertion/wait engine ---

    /// Wait until `predicate` holds, with the scenario's default timing
    pub async fn expect_eventually<F, Fut>(&self, description: &str, predicate: F) -> HarnessResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        wait::expect_eventually(description, predicate, self.wait_condition()).await
    }

    /// Wait until `predicate` holds, with explicit timing
    pub async fn expect_eventually_within<F, Fut>(
        &self,
        description: &str,
        predicate: F,
        condition: WaitCondition,
    ) -> HarnessResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        wait::expect_eventually(description, predicate, condition.clamp_to(self.deadline())).await
    }

    /// Evaluate `probe` until its value is accepted and return that value
    pub async fn poll_until<T, E, F, Fut, A>(
        &self,
        description: &str,
        probe: F,
        accept: A,
    ) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        A: Fn(&T) -> bool,
        T: Debug,
    {
        self.wait_condition().poll_until(description, probe, accept).await
    }

    // --- request pipeline ---

    /// Issue a request through the stub controller, carrying the session.
    ///
    /// Redirects are followed hop by hop unless disabled, in which case the
    /// absolute target is reported in [`HttpResponse::redirected_to`].
    pub async fn request(&self, request: OutboundRequest) -> HarnessResult<HttpResponse> {
        let mut url = self.resolve(&request.url)?;
        let mut method = request.method.clone();
        let mut body = request.body.clone();
        let mut visited = Vec::new();

        loop {
            let mut response = self.exchange(&method, &url, &request.headers, &body).await?;
            let location = if response.is_redirect() {
                response.header("location").map(str::to_string)
            } else {
                None
            };
            let Some(location) = location else {
                response.redirects = visited;
                return Ok(response);
            };

            let target = url
                .join(&location)
                .map_err(|_| HarnessError::InvalidUrl(location.clone()))?;

            if !request.follow_redirects {
                response.redirected_to = Some(target.to_string());
                return Ok(response);
            }
            if visited.len() >= self.inner.config.max_redirects {
                return Err(HarnessError::TooManyRedirects(self.inner.config.max_redirects));
            }

            debug!("{} redirect -> {}", response.status, target);
            visited.push(target.to_string());
            if !matches!(response.status, 307 | 308) {
                method = Method::GET;
                body = RequestBody::Empty;
            }
            url = target;
        }
    }

    /// One hop: match rules, answer or forward, record, store cookies
    async fn exchange(
        &self,
        method: &Method,
        url: &Url,
        extra_headers: &[(String, String)],
        body: &RequestBody,
    ) -> HarnessResult<HttpResponse> {
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        let mut headers = extra_headers.to_vec();
        if let Some(content_type) = body.content_type() {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push(("content-type".to_string(), content_type.to_string()));
            }
        }

        let (claim, generation) = {
            let mut state = self.inner.state.lock();
            if let Some(cookie) = state.session.cookie_header() {
                headers.push(("cookie".to_string(), cookie));
            }
            if let Some(SessionToken::Bearer { token }) = state.session.token() {
                headers.push(("authorization".to_string(), format!("Bearer {}", token)));
            }
            (state.stubs.claim(method, url.path()), state.generation)
        };

        let outbound = TransportRequest {
            method: method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: body.encode()?,
        };

        let (response, stubbed) = match &claim {
            Some(Claim {
                alias,
                action: StubAction::Respond(stub),
                ..
            }) => {
                debug!("stub '{}' answered {} {}", alias, method, path);
                if !stub.delay.is_zero() {
                    tokio::time::sleep(stub.delay).await;
                }
                (stubbed_response(stub, url), true)
            }
            Some(Claim {
                alias,
                action: StubAction::Passthrough,
                ..
            }) => {
                debug!("stub '{}' forwarding {} {}", alias, method, path);
                let response = self
                    .inner
                    .transport
                    .send(outbound)
                    .await
                    .map_err(|e| HarnessError::Forward {
                        rule: alias.clone(),
                        source: Box::new(e),
                    })?;
                (response, false)
            }
            None => (self.inner.transport.send(outbound).await?, false),
        };

        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(
                    scenario = %self.inner.name,
                    "scenario ended during {} {}, response discarded", method, path
                );
                return Ok(response);
            }
            state.session.store_set_cookies(&response);
            if let Some(claim) = &claim {
                state.stubs.record(
                    claim.id,
                    CapturedExchange {
                        alias: claim.alias.clone(),
                        request_method: method.to_string(),
                        request_path: path,
                        request_headers: headers,
                        request_body: body.to_value(),
                        response_status: response.status,
                        response_headers: response.headers.clone(),
                        response_body: response.body.clone(),
                        stubbed,
                        timestamp: Utc::now(),
                    },
                );
            }
        }
        if claim.is_some() {
            self.inner.exchange_recorded.notify_waiters();
        }

        Ok(response)
    }

    fn report(&self) -> ScenarioReport {
        let state = self.inner.state.lock();
        ScenarioReport {
            name: self.inner.name.clone(),
            duration_ms: self.inner.started.elapsed().as_millis() as u64,
            stub_rules: state.stubs.rule_count(),
            authenticated: state.session.token().is_some(),
            exchanges: state.stubs.all_exchanges(),
        }
    }

    fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.stubs.clear();
        state.session.clear();
        state.deadline = None;
        state.generation += 1;
    }
}

fn stubbed_response(stub: &StubResponse, url: &Url) -> HttpResponse {
    let (body, content_type) = stub.encoded_body();
    let mut headers = stub.headers.clone();
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
        headers.push(("content-type".to_string(), content_type.to_string()));
    }
    HttpResponse {
        status: stub.status,
        headers,
        body,
        url: url.to_string(),
        redirected_to: None,
        redirects: Vec::new(),
    }
}
