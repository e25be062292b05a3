//! SessionKit session test harness
//!
//! Test-harness core for authenticated web scenarios:
//! - Logs in programmatically and keeps the session for later requests
//! - Intercepts outbound calls, answering them from stub rules or forwarding them
//! - Records every matched exchange so tests can wait on it
//! - Polls conditions until they hold instead of sleeping
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Harness                                                    │
//! │    ├── on_scenario_start(name) -> ScenarioContext           │
//! │    └── on_scenario_end(&ctx)   -> ScenarioReport            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioContext (one per scenario, cheap to clone)         │
//! │    ├── authenticate(credentials) -> SessionToken            │
//! │    ├── register_stub(rule) -> StubHandle                    │
//! │    ├── wait_for(handle, timeout) -> CapturedExchange        │
//! │    ├── expect_eventually(description, predicate)            │
//! │    └── request(OutboundRequest) -> HttpResponse             │
//! │          │                                                  │
//! │          ├── matching stub: Respond ──▶ scripted response   │
//! │          ├── matching stub: Passthrough ──┐                 │
//! │          └── no stub ─────────────────────┴──▶ Transport    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod scenario;
pub mod session;
pub mod stub;
pub mod transport;
pub mod wait;

pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use http::{HttpResponse, OutboundRequest, RequestBody, TransportRequest};
pub use scenario::{Harness, ScenarioContext, ScenarioReport};
pub use session::{Credentials, LoginEncoding, SessionToken};
pub use stub::{
    CapturedExchange, MethodMatcher, PathPattern, StubAction, StubHandle, StubResponse, StubRule,
    StubScope,
};
pub use transport::{ReqwestTransport, Transport};
pub use wait::{expect_eventually, WaitCondition, WaitState};

/// Re-exported so callers can build requests without a direct reqwest dependency
pub use reqwest::Method;
