//! Login app as a child process, for runs against the built binary

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::AppMode;

const READY_POLL: Duration = Duration::from_millis(100);
const TERM_GRACE: Duration = Duration::from_millis(500);

/// A `sessionkit-web` process serving one login mode
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
    pub mode: AppMode,
}

impl ServerHandle {
    /// Start the binary on a free (or configured) port and wait until `/health` answers
    pub async fn spawn(config: &ServerConfig, mode: AppMode) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let addr = format!("127.0.0.1:{}", port);

        let child = Command::new(&config.binary_path)
            .env("SESSIONKIT_WEB_ADDR", &addr)
            .env("SESSIONKIT_WEB_MODE", mode.as_str())
            .env("RUST_LOG", &config.log_filter)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                E2eError::ServerStartup(format!("{}: {}", config.binary_path.display(), e))
            })?;
        info!(mode = mode.as_str(), pid = child.id(), "login app starting on {}", addr);

        let mut handle = ServerHandle {
            child,
            base_url: format!("http://{}", addr),
            port,
            mode,
        };
        handle.until_ready(config.startup_timeout).await?;
        info!(mode = mode.as_str(), "login app ready at {}", handle.base_url);
        Ok(handle)
    }

    async fn until_ready(&mut self, within: Duration) -> E2eResult<()> {
        let url = format!("{}/health", self.base_url);
        let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build()?;
        let deadline = Instant::now() + within;
        let mut probes = 0;

        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(E2eError::ServerStartup(format!("login app exited early ({})", status)));
            }

            probes += 1;
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!("{} answered {}", url, resp.status()),
                // refused until the listener is bound
                Err(e) if e.is_connect() => {}
                Err(e) => warn!("{}: {}", url, e),
            }

            if Instant::now() + READY_POLL > deadline {
                return Err(E2eError::ServerHealthCheck(probes));
            }
            sleep(READY_POLL).await;
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// SIGTERM, then kill whatever is left after a short grace period
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        debug!(pid = self.child.id(), "stopping login app");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM).is_ok() {
                let until = std::time::Instant::now() + TERM_GRACE;
                while std::time::Instant::now() < until {
                    if self.child.try_wait()?.is_some() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }

        let _ = self.child.kill();
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("login app did not stop cleanly: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub binary_path: PathBuf,

    /// `None` picks a free port per process
    pub port: Option<u16>,

    pub startup_timeout: Duration,

    /// `RUST_LOG` of the child
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("target/debug/sessionkit-web"),
            port: None,
            startup_timeout: Duration::from_secs(30),
            log_filter: "warn".to_string(),
        }
    }
}

pub fn find_free_port() -> std::io::Result<u16> {
    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}
