//! Main scenario runner: fixture servers, scenario lifecycle, results

use serde::{Deserialize, Serialize};
use sessionkit_harness::{Harness, HarnessConfig, ScenarioReport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};
use crate::executor::{StepExecutor, StepResult};
use crate::server::{ServerConfig, ServerHandle};
use crate::spec::{AppMode, ScenarioSpec};

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub report: Option<ScenarioReport>,
    pub error: Option<String>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn single(result: ScenarioResult) -> Self {
        let passed = usize::from(result.success);
        Self {
            total: 1,
            passed,
            failed: 1 - passed,
            duration_ms: result.duration_ms,
            results: vec![result],
        }
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Harness settings; the base URL is replaced per app mode
    pub harness: HarnessConfig,

    /// Fixture server settings used when `spawn_server` is set
    pub server: ServerConfig,

    /// Spawn the fixture binary for modes without an explicit base URL
    pub spawn_server: bool,

    /// Explicit base URL per app mode
    pub base_urls: HashMap<AppMode, String>,

    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            harness: HarnessConfig::default(),
            server: ServerConfig::default(),
            spawn_server: false,
            base_urls: HashMap::new(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Runs YAML scenarios, each in its own scenario context
pub struct ScenarioRunner {
    config: RunnerConfig,
    servers: HashMap<AppMode, ServerHandle>,
}

impl ScenarioRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            servers: HashMap::new(),
        }
    }

    /// Base URL for a mode, spawning its fixture server if needed
    async fn base_url(&mut self, mode: AppMode) -> E2eResult<String> {
        if let Some(url) = self.config.base_urls.get(&mode) {
            return Ok(url.clone());
        }
        if !self.config.spawn_server {
            return Ok(self.config.harness.base_url.clone());
        }
        if let Some(server) = self.servers.get(&mode) {
            return Ok(server.base_url().to_string());
        }

        let server = ServerHandle::spawn(&self.config.server, mode).await?;
        let url = server.base_url().to_string();
        self.servers.insert(mode, server);
        Ok(url)
    }

    /// Stop every spawned fixture server
    pub fn stop_servers(&mut self) -> E2eResult<()> {
        for (_, mut server) in self.servers.drain() {
            server.stop()?;
        }
        Ok(())
    }

    /// Run all scenarios in the specs directory
    pub async fn run_all(&mut self) -> E2eResult<SuiteResult> {
        let specs = ScenarioSpec::load_all(&self.config.specs_dir)?;
        self.run_specs(&specs).await
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<SuiteResult> {
        let specs = ScenarioSpec::load_all(&self.config.specs_dir)?;
        let filtered: Vec<ScenarioSpec> = ScenarioSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific scenario by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<ScenarioResult> {
        let specs = ScenarioSpec::load_all(&self.config.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {}", name)))?;

        self.run_spec(&spec).await
    }

    /// Run a list of scenarios
    pub async fn run_specs(&mut self, specs: &[ScenarioSpec]) -> E2eResult<SuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", specs.len());

        for spec in specs {
            match self.run_spec(spec).await {
                Ok(result) => {
                    if result.success {
                        passed += 1;
                        info!("✓ {} ({} ms)", result.name, result.duration_ms);
                    } else {
                        failed += 1;
                        error!(
                            "✗ {} - {}",
                            result.name,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    failed += 1;
                    error!("✗ {} - {}", spec.name, e);
                    results.push(ScenarioResult {
                        name: spec.name.clone(),
                        success: false,
                        duration_ms: 0,
                        steps: vec![],
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(SuiteResult {
            total: specs.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Run a single scenario between the start and end lifecycle hooks
    pub async fn run_spec(&mut self, spec: &ScenarioSpec) -> E2eResult<ScenarioResult> {
        let start = Instant::now();
        debug!("Running scenario: {}", spec.name);

        let base_url = self.base_url(spec.app).await?;
        let harness = Harness::with_reqwest(self.config.harness.clone().with_base_url(base_url))?;

        let ctx = harness.on_scenario_start(&spec.name)?;
        if let Some(ms) = spec.timeout_ms {
            ctx.set_deadline(Duration::from_millis(ms));
        }

        let mut executor = StepExecutor::new(ctx.clone());
        let mut step_results = Vec::new();
        let mut scenario_error: Option<String> = None;

        for step in &spec.steps {
            let result = executor.execute_step(step).await;

            if !result.success {
                scenario_error = result
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", result.step_name, e));
                step_results.push(result);
                break; // Stop on first failure
            }

            step_results.push(result);
        }

        let report = harness.on_scenario_end(&ctx);

        Ok(ScenarioResult {
            name: spec.name.clone(),
            success: scenario_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps: step_results,
            report: Some(report),
            error: scenario_error,
        })
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("scenario-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        let _ = self.stop_servers();
    }
}
