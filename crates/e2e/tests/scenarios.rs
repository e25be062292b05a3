//! Runs the shipped YAML scenarios against in-process login apps

use sessionkit_e2e::runner::{RunnerConfig, ScenarioRunner};
use sessionkit_e2e::{AppMode, ScenarioSpec};
use sessionkit_harness::HarnessConfig;
use sessionkit_web::{LoginMode, WebServer, WebServerConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::net::TcpListener;

fn specs_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/specs"))
}

async fn serve(mode: LoginMode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let server = WebServer::new(WebServerConfig {
        mode,
        ..Default::default()
    });
    tokio::spawn(async move { server.serve_listener(listener).await.unwrap() });
    url
}

async fn runner(output_dir: PathBuf) -> ScenarioRunner {
    let mut base_urls = HashMap::new();
    base_urls.insert(AppMode::Html, serve(LoginMode::Html).await);
    base_urls.insert(AppMode::Xhr, serve(LoginMode::Xhr).await);

    ScenarioRunner::new(RunnerConfig {
        harness: HarnessConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
        base_urls,
        specs_dir: specs_dir(),
        output_dir,
        ..Default::default()
    })
}

#[test]
fn test_shipped_specs_parse() {
    let specs = ScenarioSpec::load_all(&specs_dir()).unwrap();
    assert!(specs.len() >= 12);
    assert!(specs.iter().any(|s| s.app == AppMode::Xhr));
    assert!(specs.iter().any(|s| s.app == AppMode::Html));
}

#[tokio::test]
async fn test_all_shipped_scenarios_pass() {
    let output = tempfile::tempdir().unwrap();
    let mut runner = runner(output.path().to_path_buf()).await;

    let suite = runner.run_all().await.unwrap();
    let failures: Vec<_> = suite
        .results
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("{}: {}", r.name, r.error.as_deref().unwrap_or("?")))
        .collect();
    assert!(failures.is_empty(), "failed scenarios: {:#?}", failures);
    assert_eq!(suite.passed, suite.total);

    let path = runner.write_results(&suite).unwrap();
    assert!(path.ends_with("scenario-results.json"));
}

#[tokio::test]
async fn test_stub_scenario_reports_exchange() {
    let output = tempfile::tempdir().unwrap();
    let mut runner = runner(output.path().to_path_buf()).await;

    let result = runner.run_test("xhr-stubbed-503").await.unwrap();
    assert!(result.success, "{:?}", result.error);

    let report = result.report.unwrap();
    assert_eq!(report.exchanges.len(), 1);
    assert_eq!(report.exchanges[0].alias, "postLogin");
    assert_eq!(report.exchanges[0].response_status, 503);
}

#[tokio::test]
async fn test_failing_step_stops_scenario() {
    let output = tempfile::tempdir().unwrap();
    let mut runner = runner(output.path().to_path_buf()).await;
    let spec = ScenarioSpec::from_yaml(
        r#"
name: wrong-heading
timeout_ms: 300
steps:
  - action: visit
    url: /unauthorized
  - action: expect
    text: { selector: h3, contains: "Welcome back" }
  - action: log
    message: never reached
"#,
    )
    .unwrap();

    let result = runner.run_spec(&spec).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert!(result.error.unwrap().starts_with("expect:"));
}

#[tokio::test]
async fn test_unknown_alias_fails() {
    let output = tempfile::tempdir().unwrap();
    let mut runner = runner(output.path().to_path_buf()).await;
    let spec = ScenarioSpec::from_yaml(
        "name: no-alias\nsteps:\n  - action: wait\n    alias: missing\n",
    )
    .unwrap();

    let result = runner.run_spec(&spec).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Unknown stub alias: missing"));
}
