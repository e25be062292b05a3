//! HTTP transport abstraction and the reqwest-backed implementation

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::HarnessResult;
use crate::http::{HttpResponse, TransportRequest};

/// Sends a resolved request to the real network
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> HarnessResult<HttpResponse>;
}

/// Transport backed by a `reqwest::Client`.
///
/// Redirects are never followed here; the scenario pipeline follows them
/// hop by hop so cookies set along the way are captured.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> HarnessResult<HttpResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self.client.request(request.method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            url: request.url.to_string(),
            redirected_to: None,
            redirects: Vec::new(),
        })
    }
}
