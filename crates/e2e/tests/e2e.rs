//! Scenario runner entry point
//!
//! This file is the test binary that runs the YAML scenarios.
//! Run with: cargo test --package sessionkit-e2e --test e2e
//!
//! By default both login apps are served in-process on ephemeral ports.
//! `--server-binary` spawns the app binary instead; `--html-url` and
//! `--xhr-url` point at apps that are already running.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use sessionkit_e2e::runner::{RunnerConfig, ScenarioRunner, SuiteResult};
use sessionkit_e2e::server::ServerConfig;
use sessionkit_e2e::{AppMode, E2eResult};
use sessionkit_harness::HarnessConfig;
use sessionkit_web::{LoginMode, WebServer, WebServerConfig};

#[derive(Parser, Debug)]
#[command(name = "sessionkit-e2e")]
#[command(about = "Scenario runner for the SessionKit login app")]
struct Args {
    /// Path to scenario specs directory
    #[arg(short, long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/specs"))]
    specs: PathBuf,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// Harness configuration file (TOML)
    #[arg(short, long, env = "SESSIONKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Spawn this login app binary instead of serving in-process
    #[arg(long)]
    server_binary: Option<PathBuf>,

    /// Base URL of a running HTML-form login app
    #[arg(long)]
    html_url: Option<String>,

    /// Base URL of a running XHR login app
    #[arg(long)]
    xhr_url: Option<String>,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Run async main
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let result = rt.block_on(async_main(args));

    match result {
        Ok(success) => {
            if success {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Serve a login app in this process and return its base URL
async fn serve_in_process(mode: LoginMode) -> E2eResult<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let server = WebServer::new(WebServerConfig {
        mode,
        ..Default::default()
    });
    tokio::spawn(async move {
        if let Err(e) = server.serve_listener(listener).await {
            eprintln!("login app stopped: {}", e);
        }
    });
    Ok(url)
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let harness = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    }
    .with_env_overrides()?;

    let mut base_urls = HashMap::new();
    if let Some(url) = args.html_url {
        base_urls.insert(AppMode::Html, url);
    }
    if let Some(url) = args.xhr_url {
        base_urls.insert(AppMode::Xhr, url);
    }

    let mut server = ServerConfig::default();
    let spawn_server = match args.server_binary {
        Some(path) => {
            server.binary_path = path;
            true
        }
        None => {
            for (mode, login_mode) in [(AppMode::Html, LoginMode::Html), (AppMode::Xhr, LoginMode::Xhr)] {
                if !base_urls.contains_key(&mode) {
                    base_urls.insert(mode, serve_in_process(login_mode).await?);
                }
            }
            false
        }
    };

    let config = RunnerConfig {
        harness,
        server,
        spawn_server,
        base_urls,
        specs_dir: args.specs,
        output_dir: args.output,
    };

    let mut runner = ScenarioRunner::new(config);

    // Run scenarios
    let results = if let Some(name) = args.name {
        SuiteResult::single(runner.run_test(&name).await?)
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag).await?
    } else {
        runner.run_all().await?
    };

    // Write results
    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
