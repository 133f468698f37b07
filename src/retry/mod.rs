//! Transient-failure retry discipline for remote calls.
//!
//! The orchestrator is eventually consistent and occasionally unreachable;
//! a dropped connection must not fail a test that is hours into its run.
//! [`RetryPolicy::run`] retries a fixed set of failure kinds forever with a
//! slow-growth backoff and propagates everything else immediately, so
//! permanent failures still surface. A permanently unreachable orchestrator
//! stalls the caller until its own test deadline fires, which is the actual
//! bound on test duration.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::client::{ClientError, FailureKind};

/// Backoff applied before the first retry.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(64);

/// Retry policy for remote calls: which failure kinds are transient, and
/// how long to back off before the first retry.
///
/// After every failed attempt the delay grows by half its own value,
/// truncating (64 s, 96 s, 144 s, 216 s, …), without bound.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    transient: BTreeSet<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_RETRY_DELAY,
            transient: BTreeSet::from([
                FailureKind::Transport,
                FailureKind::Http,
                FailureKind::Connection,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy treating exactly `transient` kinds as retryable.
    #[must_use]
    pub fn with_transient_kinds(transient: impl IntoIterator<Item = FailureKind>) -> Self {
        Self {
            initial_delay: INITIAL_RETRY_DELAY,
            transient: transient.into_iter().collect(),
        }
    }

    /// Overrides the backoff applied before the first retry.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Returns whether `error` would be retried by this policy.
    #[must_use]
    pub fn is_transient(&self, error: &ClientError) -> bool {
        self.transient.contains(&error.kind())
    }

    /// Runs `op`, retrying transient failures until it either succeeds or
    /// fails with a non-transient error.
    ///
    /// `op` must build a fresh future per attempt; each attempt performs
    /// exactly one remote call. Every retry logs the failure and the chosen
    /// delay, which is the only user-visible signal during a long stall.
    ///
    /// # Errors
    ///
    /// Returns the first error whose kind is not in the policy's transient
    /// set. Transient failures never surface.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut delay_secs = self.initial_delay.as_secs();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.is_transient(&err) => {
                    tracing::warn!(%err, operation, delay_secs, "transient failure, retrying");
                    sleep(Duration::from_secs(delay_secs)).await;
                    delay_secs += delay_secs >> 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
