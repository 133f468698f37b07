//! Lifecycle state machine driving one software release through an
//! acceptance test.
//!
//! A [`ReleaseTester`] owns a current state, an optional deadline, and a
//! fixed transition table. An external scheduler calls [`ReleaseTester::tick`]
//! with the current time; the tester advances only when the required remote
//! condition is observed and fails with [`TesterError::DeadlineExceeded`]
//! when a stage overruns its deadline. Polling is level-triggered: a slow or
//! skipped tick delays a transition but never loses it.
//!
//! The full sequence is supply → install → start → stop → destroy. When no
//! instantiation parameters are given the instance stages are skipped, and
//! when no node is bound the supply stage is trivially satisfied.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::client::{
    ClientError, FeedEntry, OrchestratorClient, RequestedState, StatusMessage, SupplyState,
};
use crate::retry::RetryPolicy;

mod poll;

/// Deadline for the instance-destroy and supply-destroy stages.
pub const DESTROY_TIMEOUT: Duration = Duration::from_secs(1200);

/// Position of a tester in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TesterState {
    /// Entry state; advances unconditionally on the first tick.
    Initial,
    /// Supply requested, waiting for the release to install.
    Nothing,
    /// Release installed, instance requested, waiting for it to start.
    SoftwareInstalled,
    /// Instance observed running; destruction requested.
    InstanceStarted,
    /// Terminal state: instance gone, supply destruction requested.
    InstanceUninstalled,
}

impl std::fmt::Display for TesterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Initial => "initial",
            Self::Nothing => "nothing",
            Self::SoftwareInstalled => "software installed",
            Self::InstanceStarted => "instance started",
            Self::InstanceUninstalled => "instance uninstalled",
        };
        f.write_str(label)
    }
}

/// Installation state derived from the node's installation status message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftwareState {
    /// No usable installation report yet.
    Unknown,
    /// Installation reported in progress.
    Installing,
    /// Release reported installed.
    Installed,
}

impl std::fmt::Display for SoftwareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Installing => "installing",
            Self::Installed => "installed",
        };
        f.write_str(label)
    }
}

/// Running state derived from a partition's status reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No usable report, or conflicting reports across partitions.
    Unknown,
    /// Partition reported running.
    Started,
    /// Partition reported running but failing its promises.
    StartedWithError,
    /// Partition reported correctly stopped.
    Stopped,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Started => "started",
            Self::StartedWithError => "started with error",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Identity of one release-under-test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestTarget {
    /// Software release to exercise.
    pub release_url: String,
    /// Logical partition reference the instance is requested under.
    pub partition_name: String,
    /// Node the release is supplied on. `None` skips the supply stage.
    pub node_id: Option<String>,
    /// Instantiation parameters. `None` means a software-only test with no
    /// instance stage.
    pub parameters: Option<BTreeMap<String, String>>,
}

impl TestTarget {
    /// Starts a builder for a [`TestTarget`].
    #[must_use]
    pub fn builder() -> TestTargetBuilder {
        TestTargetBuilder::default()
    }

    /// Validates the target, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Validation`] when the release URL or partition
    /// name is empty.
    pub fn validate(&self) -> Result<(), TargetError> {
        if self.release_url.is_empty() {
            return Err(TargetError::Validation(String::from("release_url")));
        }
        if self.partition_name.is_empty() {
            return Err(TargetError::Validation(String::from("partition_name")));
        }
        Ok(())
    }
}

/// Builder for [`TestTarget`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestTargetBuilder {
    release_url: String,
    partition_name: String,
    node_id: Option<String>,
    parameters: Option<BTreeMap<String, String>>,
}

impl TestTargetBuilder {
    /// Sets the software release URL.
    #[must_use]
    pub fn release_url(mut self, value: impl Into<String>) -> Self {
        self.release_url = value.into();
        self
    }

    /// Sets the logical partition reference.
    #[must_use]
    pub fn partition_name(mut self, value: impl Into<String>) -> Self {
        self.partition_name = value.into();
        self
    }

    /// Sets the node the release is supplied on.
    #[must_use]
    pub fn node_id(mut self, value: Option<String>) -> Self {
        self.node_id = value;
        self
    }

    /// Sets the instantiation parameters.
    #[must_use]
    pub fn parameters(mut self, value: Option<BTreeMap<String, String>>) -> Self {
        self.parameters = value;
        self
    }

    /// Builds and validates the [`TestTarget`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<TestTarget, TargetError> {
        let target = TestTarget {
            release_url: self.release_url.trim().to_owned(),
            partition_name: self.partition_name.trim().to_owned(),
            node_id: self.node_id.map(|value| value.trim().to_owned()),
            parameters: self.parameters,
        };
        target.validate()?;
        Ok(target)
    }
}

/// Errors raised while constructing a [`TestTarget`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TargetError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Snapshot of one polled partition, kept for reporting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    /// Partition title.
    pub title: String,
    /// Whether the partition is a slave (satellite) partition.
    pub is_slave: bool,
    /// Newest status message at poll time.
    pub news: Option<StatusMessage>,
    /// Age of the status timestamp at poll time, in seconds.
    pub status_age_secs: Option<i64>,
    /// Connection parameters at poll time.
    pub connection: BTreeMap<String, String>,
    /// Instantiation parameters at poll time.
    pub parameters: BTreeMap<String, String>,
    /// Monitoring feed extract, attached only when the partition reported
    /// an error.
    pub monitor: Option<FeedEntry>,
    /// State derived for this partition.
    pub state: InstanceState,
}

/// Errors raised by the lifecycle state machine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TesterError {
    /// Raised when a stage overruns its deadline. Carries the state the
    /// tester was stalled in.
    #[error("test deadline exceeded in state: {state}")]
    DeadlineExceeded {
        /// State at the time the deadline fired.
        state: TesterState,
    },
    /// Raised when a remote call fails permanently.
    #[error("remote call failed: {0}")]
    Client(#[from] ClientError),
}

/// Action executed when a state is entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryAction {
    SupplyAvailable,
    RequestStarted,
    RequestDestroyed,
    SupplyDestroyed,
}

/// One row of the transition table: what runs on entry, how long the state
/// may last, where it leads, and what must be observed to leave it.
struct Transition {
    action: Option<EntryAction>,
    timeout: Option<Duration>,
    next: Option<TesterState>,
    software: Option<SoftwareState>,
    instance: Option<InstanceState>,
}

/// Drives one software release through its acceptance lifecycle.
pub struct ReleaseTester<C> {
    client: C,
    retry: RetryPolicy,
    target: TestTarget,
    software_timeout: Duration,
    instance_timeout: Duration,
    state: TesterState,
    deadline: Option<Instant>,
    latest_requested_state: Option<RequestedState>,
    history: Vec<Vec<InstanceSnapshot>>,
}

impl<C> ReleaseTester<C>
where
    C: OrchestratorClient,
{
    /// Creates a tester for `target`, polling through `client`.
    #[must_use]
    pub fn new(
        client: C,
        target: TestTarget,
        software_timeout: Duration,
        instance_timeout: Duration,
    ) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            target,
            software_timeout,
            instance_timeout,
            state: TesterState::Initial,
            deadline: None,
            latest_requested_state: None,
            history: Vec::new(),
        }
    }

    /// Overrides the retry policy applied to every remote call.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the tester's current state.
    #[must_use]
    pub const fn state(&self) -> TesterState {
        self.state
    }

    /// Returns the current stage deadline, when one is armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the last instance state requested on the orchestrator.
    #[must_use]
    pub const fn latest_requested_state(&self) -> Option<RequestedState> {
        self.latest_requested_state
    }

    /// Returns the accumulated per-tick snapshot history.
    #[must_use]
    pub fn history(&self) -> &[Vec<InstanceSnapshot>] {
        &self.history
    }

    /// Returns the release-under-test.
    #[must_use]
    pub const fn target(&self) -> &TestTarget {
        &self.target
    }

    fn transition(&self, state: TesterState) -> Transition {
        match state {
            TesterState::Initial => Transition {
                action: None,
                timeout: None,
                next: Some(TesterState::Nothing),
                software: None,
                instance: None,
            },
            TesterState::Nothing => Transition {
                action: Some(EntryAction::SupplyAvailable),
                timeout: Some(self.software_timeout),
                next: Some(if self.target.parameters.is_none() {
                    TesterState::InstanceUninstalled
                } else {
                    TesterState::SoftwareInstalled
                }),
                software: Some(SoftwareState::Installed),
                instance: None,
            },
            TesterState::SoftwareInstalled => Transition {
                action: Some(EntryAction::RequestStarted),
                timeout: Some(self.instance_timeout),
                next: Some(TesterState::InstanceStarted),
                software: None,
                instance: Some(InstanceState::Started),
            },
            TesterState::InstanceStarted => Transition {
                action: Some(EntryAction::RequestDestroyed),
                timeout: Some(DESTROY_TIMEOUT),
                next: Some(TesterState::InstanceUninstalled),
                software: None,
                instance: Some(InstanceState::Stopped),
            },
            TesterState::InstanceUninstalled => Transition {
                action: Some(EntryAction::SupplyDestroyed),
                timeout: Some(DESTROY_TIMEOUT),
                next: None,
                software: None,
                instance: None,
            },
        }
    }

    /// Runs one evaluation step at time `now`.
    ///
    /// Checks the stage deadline, polls the remote conditions of the current
    /// state, and advances when they are observed, arming the next stage's
    /// deadline and executing its entry action. Returns the deadline the
    /// caller should tick against next, or `None` once the terminal state is
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns [`TesterError::DeadlineExceeded`] when a deadline is armed and
    /// `now` is past it, regardless of whether the stage condition would
    /// otherwise be satisfied, and [`TesterError::Client`] when a remote call
    /// fails permanently.
    pub async fn tick(&mut self, now: Instant) -> Result<Option<Instant>, TesterError> {
        tracing::debug!(state = %self.state, "tick");
        if let Some(deadline) = self.deadline {
            if now > deadline {
                return Err(TesterError::DeadlineExceeded { state: self.state });
            }
        }

        let current = self.transition(self.state);
        if !self.conditions_met(&current).await? {
            return Ok(self.deadline);
        }

        let Some(next) = current.next else {
            return Ok(None);
        };

        tracing::debug!(from = %self.state, to = %next, "advancing state");
        self.state = next;
        let entered = self.transition(next);
        if let Some(timeout) = entered.timeout {
            self.deadline = Some(now + timeout);
        }
        if let Some(action) = entered.action {
            self.perform(action).await?;
        }
        Ok(self.deadline)
    }

    /// Interrupts a running test sequence.
    ///
    /// Issues destruction requests for whatever was requested (the instance
    /// when parameters were supplied, the supply when a node is bound) and
    /// forces the terminal state. Does not wait for the destructions to
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns [`TesterError::Client`] when a destruction request fails
    /// permanently.
    pub async fn teardown(&mut self) -> Result<(), TesterError> {
        tracing::info!(
            release = %self.target.release_url,
            partition = %self.target.partition_name,
            "tearing down",
        );
        if self.target.parameters.is_some() {
            self.request(RequestedState::Destroyed).await?;
        }
        if self.target.node_id.is_some() {
            self.supply(SupplyState::Destroyed).await?;
        }
        self.state = TesterState::InstanceUninstalled;
        Ok(())
    }

    async fn conditions_met(&mut self, current: &Transition) -> Result<bool, TesterError> {
        if let Some(required) = current.software {
            if self.software_state().await? != required {
                return Ok(false);
            }
        }
        if let Some(required) = current.instance {
            if self.instance_state().await? != required {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn perform(&mut self, action: EntryAction) -> Result<(), TesterError> {
        match action {
            EntryAction::SupplyAvailable => self.supply(SupplyState::Available).await,
            EntryAction::RequestStarted => self.request(RequestedState::Started).await,
            EntryAction::RequestDestroyed => self.request(RequestedState::Destroyed).await,
            EntryAction::SupplyDestroyed => self.supply(SupplyState::Destroyed).await,
        }
    }

    async fn supply(&self, state: SupplyState) -> Result<(), TesterError> {
        let Some(node_id) = self.target.node_id.as_deref() else {
            tracing::info!(partition = %self.target.partition_name, "nothing to supply");
            return Ok(());
        };
        tracing::info!(
            release = %self.target.release_url,
            node = %node_id,
            %state,
            "requesting supply",
        );
        self.retry
            .run("supply", || {
                self.client.supply(&self.target.release_url, node_id, state)
            })
            .await?;
        Ok(())
    }

    async fn request(&mut self, state: RequestedState) -> Result<(), TesterError> {
        tracing::info!(
            release = %self.target.release_url,
            partition = %self.target.partition_name,
            %state,
            "requesting instance",
        );
        self.latest_requested_state = Some(state);
        self.retry
            .run("instance request", || {
                self.client.request_instance(
                    &self.target.release_url,
                    &self.target.partition_name,
                    state,
                    self.target.parameters.as_ref(),
                )
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
