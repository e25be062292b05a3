//! Shared fixtures: the login app served in-process on an ephemeral port

#![allow(dead_code)]

use sessionkit_harness::{Harness, HarnessConfig, ScenarioContext};
use sessionkit_web::{LoginMode, WebServer, WebServerConfig};
use std::time::Duration;
use tokio::net::TcpListener;

pub struct TestApp {
    pub base_url: String,
    pub harness: Harness,
}

impl TestApp {
    pub async fn start(mode: LoginMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = WebServer::new(WebServerConfig {
            mode,
            ..Default::default()
        });
        tokio::spawn(async move {
            server.serve_listener(listener).await.unwrap();
        });

        let config = HarnessConfig {
            default_timeout_ms: 4000,
            poll_interval_ms: 10,
            ..Default::default()
        }
        .with_base_url(base_url.clone());
        let harness = Harness::with_reqwest(config).unwrap();

        Self { base_url, harness }
    }

    pub fn scenario(&self, name: &str) -> ScenarioContext {
        self.harness.on_scenario_start(name).unwrap()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub const SHORT: Duration = Duration::from_secs(2);
