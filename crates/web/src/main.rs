use std::net::SocketAddr;

use tracing::info;

use sessionkit_web::server::{WebServer, WebServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let web_addr: SocketAddr = std::env::var("SESSIONKIT_WEB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8082".to_string())
        .parse()?;

    let cfg = WebServerConfig::from_env()?;

    info!(
        "Starting SessionKit login app on http://{} ({} mode)",
        web_addr,
        cfg.mode.as_str()
    );

    WebServer::new(cfg).serve(web_addr).await
}
