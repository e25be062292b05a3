//! SessionKit scenario runner
//!
//! Drives login scenarios against the SessionKit login app:
//! - Spawns the app as a subprocess (or targets a running one)
//! - Models the login page headlessly, including its XHR submission
//! - Parses declarative YAML scenarios and runs each in a fresh scenario context
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_spec(spec)                                             │
//! │    ├── Harness::on_scenario_start(name) -> ScenarioContext  │
//! │    ├── StepExecutor::execute_step(step) -> StepResult       │
//! │    │     ├── authenticate / stub / wait / request           │
//! │    │     └── Page: visit, type, submit, expect              │
//! │    └── Harness::on_scenario_end(ctx) -> ScenarioReport      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioSpec (YAML)                                        │
//! │    ├── name, description, tags, app: html | xhr             │
//! │    └── steps: [Step]                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod executor;
pub mod page;
pub mod runner;
pub mod server;
pub mod spec;

pub use error::{E2eError, E2eResult};
pub use executor::{StepExecutor, StepResult};
pub use page::Page;
pub use runner::{RunnerConfig, ScenarioRunner, SuiteResult};
pub use spec::{AppMode, ScenarioSpec, ScenarioStep};
