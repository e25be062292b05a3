//! Assertion/wait engine
//!
//! A wait re-evaluates a probe at a fixed cadence until the probe's value is
//! accepted or the deadline passes:
//!
//! ```text
//! Pending ──accepted──▶ Satisfied
//!    │
//!    ├──deadline, some value observed──▶ TimedOut
//!    └──deadline, every attempt errored──▶ Errored
//! ```
//!
//! The first evaluation happens immediately and the last one happens at the
//! deadline, so a wait never fails early.

use std::convert::Infallible;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::error::{HarnessError, HarnessResult};

/// Lifecycle of a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Satisfied,
    TimedOut,
    Errored,
}

impl WaitState {
    /// Terminal state a finished wait ended in
    pub fn of<T>(result: &HarnessResult<T>) -> Self {
        match result {
            Ok(_) => WaitState::Satisfied,
            Err(HarnessError::Predicate { .. }) => WaitState::Errored,
            Err(e) if e.is_timeout() => WaitState::TimedOut,
            Err(_) => WaitState::Errored,
        }
    }
}

/// Timing parameters of one wait
#[derive(Debug, Clone, Copy)]
pub struct WaitCondition {
    pub timeout: Duration,
    pub poll_interval: Duration,

    /// Hard stop inherited from the scenario, if any
    pub deadline: Option<Instant>,
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(4),
            poll_interval: Duration::from_millis(50),
            deadline: None,
        }
    }
}

impl WaitCondition {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            deadline: None,
        }
    }

    /// Clamp this wait to an outer deadline
    pub fn clamp_to(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub(crate) fn deadline_from(&self, start: Instant) -> Instant {
        let own = start + self.timeout;
        match self.deadline {
            Some(outer) => own.min(outer),
            None => own,
        }
    }

    /// Evaluate `probe` until `accept` returns true for its value.
    ///
    /// Returns the accepted value. Errors from the probe are retried like
    /// unaccepted values; they only surface as [`HarnessError::Predicate`]
    /// when no attempt produced a value at all.
    pub async fn poll_until<T, E, F, Fut, A>(
        &self,
        description: &str,
        mut probe: F,
        accept: A,
    ) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        A: Fn(&T) -> bool,
        T: Debug,
    {
        let start = Instant::now();
        let deadline = self.deadline_from(start);
        let mut attempts: u32 = 0;
        let mut last_observed: Option<String> = None;
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            attempts += 1;
            match probe().await {
                Ok(value) if accept(&value) => {
                    debug!(
                        state = ?WaitState::Satisfied,
                        attempts,
                        "'{}' satisfied after {:?}",
                        description,
                        start.elapsed()
                    );
                    return Ok(value);
                }
                Ok(value) => last_observed = Some(format!("{:?}", value)),
                Err(e) => last_error = Some(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            trace!(state = ?WaitState::Pending, attempts, "'{}' not yet satisfied", description);
            sleep_until((now + self.poll_interval).min(deadline)).await;
        }

        match (last_observed, last_error) {
            (None, Some(source)) => {
                warn!(state = ?WaitState::Errored, attempts, "'{}' errored: {}", description, source);
                Err(HarnessError::Predicate {
                    description: description.to_string(),
                    attempts,
                    source,
                })
            }
            (observed, error) => {
                warn!(state = ?WaitState::TimedOut, attempts, "'{}' timed out", description);
                Err(HarnessError::AssertionTimeout {
                    description: description.to_string(),
                    timeout: deadline - start,
                    attempts,
                    last_observed: observed.unwrap_or_else(|| "<nothing>".to_string()),
                    last_error: error.map(|e| e.to_string()),
                })
            }
        }
    }
}

/// Wait until `predicate` returns true
pub async fn expect_eventually<F, Fut>(
    description: &str,
    mut predicate: F,
    condition: WaitCondition,
) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    condition
        .poll_until(
            description,
            || {
                let fut = predicate();
                async move { Ok::<_, Infallible>(fut.await) }
            },
            |satisfied| *satisfied,
        )
        .await
        .map(|_| ())
}
