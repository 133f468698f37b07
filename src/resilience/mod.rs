//! Failover ("takeover") acceptance harness for resilient deployments.
//!
//! A resilient deployment runs one primary instance and N-1 clones named
//! `namebase + index` (index 0 is the primary). The harness pushes a payload
//! to the primary, waits out a replication window, promotes each clone in
//! turn, and verifies the payload survived the promotion. The payload itself
//! is opaque: concrete tests supply a [`Workload`] strategy object.
//!
//! Replication completion is not observable through the client surface, so
//! the wait is a fixed window rather than a poll; it defaults to fifteen
//! minutes and is injectable for tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::client::{ClientError, ClientFuture, OrchestratorClient, TakeoverRequest};
use crate::retry::RetryPolicy;

mod probe;

pub use probe::{KeyProbeWorkload, ProbeError};

/// Replication window waited out before each takeover.
pub const DEFAULT_REPLICATION_WAIT: Duration = Duration::from_secs(15 * 60);

/// Interval between connection-parameter polls.
pub const DEFAULT_PARAMETER_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Value the orchestrator publishes for parameters that are not set yet.
pub const UNSET_PARAMETER_SENTINEL: &str = "None";

/// Future returned by workload hooks.
pub type WorkloadFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Identity of one resilient deployment under test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResiliencySession {
    /// Software release of the deployment.
    pub release_url: String,
    /// Node hosting the deployment.
    pub node_id: String,
    /// Partition the takeover is issued from.
    pub partition_id: String,
    /// Naming scheme of the clone set.
    pub namebase: String,
    /// Name of the root ("resilient") instance whose connection parameters
    /// locate the current primary.
    pub root_instance_name: String,
    /// Total number of instances, primary included.
    pub total_instance_count: u32,
}

impl ResiliencySession {
    /// Validates the session, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] when any string field is empty,
    /// or [`SessionError::NoClones`] when the instance count leaves nothing
    /// to fail over to.
    pub fn validate(&self) -> Result<(), SessionError> {
        for (field, value) in [
            ("release_url", &self.release_url),
            ("node_id", &self.node_id),
            ("partition_id", &self.partition_id),
            ("namebase", &self.namebase),
            ("root_instance_name", &self.root_instance_name),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::Validation(field.to_owned()));
            }
        }
        if self.total_instance_count < 2 {
            return Err(SessionError::NoClones {
                total_instance_count: self.total_instance_count,
            });
        }
        Ok(())
    }
}

/// Errors raised while constructing a [`ResiliencySession`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the instance count leaves no clone to promote.
    #[error("total instance count {total_instance_count} leaves no clone to test")]
    NoClones {
        /// Configured instance count, primary included.
        total_instance_count: u32,
    },
}

/// Seam through which workload hooks observe the deployment's published
/// connection parameters.
pub trait ParameterWatcher: Send + Sync {
    /// Returns the current value of one connection parameter of the root
    /// instance, when set.
    fn connection_parameter<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<String>>;

    /// Polls the root instance's connection parameters until the value under
    /// `key` exists, differs from `old_value`, and is not the unset
    /// sentinel. Used to locate the new primary after a takeover.
    fn wait_for_changed_parameter<'a>(
        &'a self,
        key: &'a str,
        old_value: &'a str,
    ) -> ClientFuture<'a, String>;
}

/// Payload hooks supplied by a concrete resiliency test.
///
/// The harness is payload-agnostic: it only sequences the hooks around
/// takeovers. Hooks receive a [`ParameterWatcher`] so they can locate the
/// current primary before talking to it.
pub trait Workload {
    /// Payload pushed to the primary and checked on each promoted clone.
    type Payload;
    /// Failure type of the hook operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produces the payload for this run.
    fn generate(&mut self) -> Self::Payload;

    /// Pushes `payload` to the current primary instance.
    fn push_to_primary<'a>(
        &'a mut self,
        watcher: &'a dyn ParameterWatcher,
        payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, (), Self::Error>;

    /// Checks that `payload` is intact on the newly promoted primary.
    /// Returns `false` when the payload did not survive; errors are reserved
    /// for the check itself failing to run.
    fn verify_on_new_primary<'a>(
        &'a mut self,
        watcher: &'a dyn ParameterWatcher,
        payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, bool, Self::Error>;
}

/// Verdict of one harness run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuiteOutcome {
    /// Every clone served the payload after promotion.
    Passed,
    /// A promoted clone failed verification; later clones were not tested.
    Failed {
        /// Index of the clone that failed verification.
        clone_index: u32,
    },
}

impl SuiteOutcome {
    /// Returns whether the run passed.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Errors raised by the harness.
#[derive(Debug, Error)]
pub enum HarnessError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when pushing the payload to the primary fails.
    #[error("failed to push payload to primary instance: {0}")]
    Push(#[source] E),
    /// Raised when the verification hook itself fails to run.
    #[error("failed to verify payload on promoted clone: {0}")]
    Verify(#[source] E),
    /// Raised when a takeover request is rejected.
    #[error("takeover request failed: {0}")]
    Takeover(#[source] ClientError),
}

/// Sequences an N-clone failover test over an orchestrator client.
pub struct ResiliencyHarness<C> {
    client: C,
    retry: RetryPolicy,
    session: ResiliencySession,
    replication_wait: Duration,
    parameter_poll_interval: Duration,
}

impl<C> ResiliencyHarness<C>
where
    C: OrchestratorClient,
{
    /// Creates a harness for `session`, operating through `client`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session fails validation.
    pub fn new(client: C, session: ResiliencySession) -> Result<Self, SessionError> {
        session.validate()?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            session,
            replication_wait: DEFAULT_REPLICATION_WAIT,
            parameter_poll_interval: DEFAULT_PARAMETER_POLL_INTERVAL,
        })
    }

    /// Overrides the replication window waited out before each takeover.
    ///
    /// This is primarily used by tests to keep failover scenarios fast.
    #[must_use]
    pub const fn with_replication_wait(mut self, wait: Duration) -> Self {
        self.replication_wait = wait;
        self
    }

    /// Overrides the connection-parameter polling interval.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_parameter_poll_interval(mut self, interval: Duration) -> Self {
        self.parameter_poll_interval = interval;
        self
    }

    /// Overrides the retry policy applied to remote calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the session under test.
    #[must_use]
    pub const fn session(&self) -> &ResiliencySession {
        &self.session
    }

    /// Runs the failover suite: push the payload to the primary, then for
    /// each clone wait out the replication window, promote it, and verify
    /// the payload. Stops at the first clone that fails verification.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] when a hook fails to run or a takeover
    /// request is rejected. A clone failing verification is reported through
    /// [`SuiteOutcome::Failed`], not an error.
    pub async fn run_suite<W>(
        &self,
        workload: &mut W,
    ) -> Result<SuiteOutcome, HarnessError<W::Error>>
    where
        W: Workload,
    {
        let payload = workload.generate();
        workload
            .push_to_primary(self, &payload)
            .await
            .map_err(HarnessError::Push)?;

        let clone_count = self.session.total_instance_count.saturating_sub(1);
        for clone_index in 1..=clone_count {
            tracing::info!(
                wait_secs = self.replication_wait.as_secs(),
                clone_index,
                "waiting for replication before takeover",
            );
            sleep(self.replication_wait).await;

            self.takeover(clone_index)
                .await
                .map_err(HarnessError::Takeover)?;

            tracing::info!(
                instance = %format!("{}{clone_index}", self.session.namebase),
                "verifying payload on promoted clone",
            );
            let verified = workload
                .verify_on_new_primary(self, &payload)
                .await
                .map_err(HarnessError::Verify)?;
            if !verified {
                tracing::error!(clone_index, "payload lost after takeover");
                return Ok(SuiteOutcome::Failed { clone_index });
            }
        }

        tracing::info!("every clone served the payload after promotion");
        Ok(SuiteOutcome::Passed)
    }

    async fn takeover(&self, winner_suffix: u32) -> Result<(), ClientError> {
        let request = TakeoverRequest {
            node_id: self.session.node_id.clone(),
            partition_id: self.session.partition_id.clone(),
            release_url: self.session.release_url.clone(),
            namebase: self.session.namebase.clone(),
            winner_suffix,
        };
        tracing::info!(
            winner = %format!("{}{winner_suffix}", self.session.namebase),
            "promoting clone to primary",
        );
        self.client.takeover(&request).await?;
        tracing::info!(winner_suffix, "takeover acknowledged");
        Ok(())
    }

    async fn fetch_parameters(&self) -> Result<BTreeMap<String, String>, ClientError> {
        self.retry
            .run("root connection parameters", || {
                self.client
                    .root_connection_parameters(&self.session.root_instance_name)
            })
            .await
    }
}

impl<C> ParameterWatcher for ResiliencyHarness<C>
where
    C: OrchestratorClient,
{
    fn connection_parameter<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<String>> {
        Box::pin(async move {
            let parameters = self.fetch_parameters().await?;
            Ok(parameters.get(key).cloned())
        })
    }

    fn wait_for_changed_parameter<'a>(
        &'a self,
        key: &'a str,
        old_value: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move {
            tracing::info!(key, "waiting for the new primary to publish its parameters");
            loop {
                sleep(self.parameter_poll_interval).await;
                let parameters = self.fetch_parameters().await?;
                match parameters.get(key) {
                    Some(value)
                        if !value.is_empty()
                            && value != UNSET_PARAMETER_SENTINEL
                            && value != old_value =>
                    {
                        tracing::info!(key, value = %value, "new primary parameter published");
                        return Ok(value.clone());
                    }
                    current => {
                        tracing::info!(key, ?current, "parameter not ready yet");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests;
