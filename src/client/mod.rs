//! Interface to the remote compute-orchestration service.
//!
//! The orchestrator itself is an external collaborator; this module defines
//! the narrow surface the test drivers need from it (supply and instance
//! requests, installation and partition status polling, the monitoring feed,
//! and clone takeover) together with the failure taxonomy the retry layer
//! classifies against. A concrete HTTP implementation lives in [`http`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;

pub use http::HttpOrchestratorClient;

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Desired supply state for a software release on a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplyState {
    /// The release should be installed and kept available.
    Available,
    /// The release should be removed from the node.
    Destroyed,
}

impl SupplyState {
    /// Wire representation understood by the orchestrator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for SupplyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state requested for an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedState {
    /// The instance should be running.
    Started,
    /// The instance should be destroyed.
    Destroyed,
}

impl RequestedState {
    /// Wire representation understood by the orchestrator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for RequestedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status message published by a partition.
///
/// The `text` payload follows the orchestrator's reporting convention:
/// `#access …` for healthy reports and `#error …` for failures.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StatusMessage {
    /// RFC 2822 timestamp of the message, when the orchestrator published one.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Raw message text.
    pub text: String,
}

/// Snapshot of one partition bound to a logical instance name, as reported
/// by the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PartitionStatus {
    /// Partition title.
    pub title: String,
    /// Whether this is a slave (satellite) partition without a standalone
    /// lifecycle.
    #[serde(default)]
    pub is_slave: bool,
    /// Status messages, newest first.
    #[serde(default)]
    pub news: Vec<StatusMessage>,
    /// Published connection parameters.
    #[serde(default)]
    pub connection: BTreeMap<String, String>,
    /// Instantiation parameters the partition is currently running with.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// One entry of a partition's monitoring feed.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FeedEntry {
    /// Publication date as reported by the feed.
    #[serde(default)]
    pub date: String,
    /// Entry body.
    #[serde(default)]
    pub message: String,
    /// Entry title.
    #[serde(default)]
    pub title: String,
}

/// Parameters of a clone takeover: promote `namebase + winner_suffix` to
/// primary, demoting the current primary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TakeoverRequest {
    /// Node hosting the resilient deployment.
    pub node_id: String,
    /// Partition the takeover is issued from.
    pub partition_id: String,
    /// Software release of the deployment.
    pub release_url: String,
    /// Naming scheme of the clone set (clone `i` is `namebase + i`).
    pub namebase: String,
    /// Index of the clone to promote.
    pub winner_suffix: u32,
}

/// Classification of a [`ClientError`], used by the retry layer to decide
/// between retrying, degrading a poll, and failing the test.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailureKind {
    /// Transport-level failure (connection refused/reset, timeout).
    Transport,
    /// HTTP-level failure (non-success status).
    Http,
    /// Orchestrator-specific connection failure.
    Connection,
    /// The orchestrator reported an error enumerating partitions.
    Enumeration,
    /// Permanent API failure (malformed response, rejected request).
    Api,
}

/// Errors raised by orchestrator clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the orchestrator cannot be reached at all.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Raised when the orchestrator answers with a failure status.
    #[error("http failure ({status}): {message}")]
    Http {
        /// HTTP status code of the response.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// Raised on orchestrator-specific connection problems.
    #[error("connection failure: {0}")]
    Connection(String),
    /// Raised when the orchestrator fails to enumerate partitions.
    #[error("partition enumeration failed: {0}")]
    Enumeration(String),
    /// Raised on permanent API failures.
    #[error("api failure: {0}")]
    Api(String),
}

impl ClientError {
    /// Returns the failure classification of this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::Http { .. } => FailureKind::Http,
            Self::Connection(_) => FailureKind::Connection,
            Self::Enumeration(_) => FailureKind::Enumeration,
            Self::Api(_) => FailureKind::Api,
        }
    }
}

/// Minimal interface the test drivers require from the orchestration
/// service.
///
/// Every method performs exactly one remote call; retry discipline is
/// applied by the caller through [`crate::retry::RetryPolicy`].
pub trait OrchestratorClient: Send + Sync {
    /// Requests that `release_url` be supplied on `node_id` in the given
    /// state.
    fn supply<'a>(
        &'a self,
        release_url: &'a str,
        node_id: &'a str,
        state: SupplyState,
    ) -> ClientFuture<'a, ()>;

    /// Requests an instance of `release_url` under `partition_name` in the
    /// given state, with optional instantiation parameters.
    fn request_instance<'a>(
        &'a self,
        release_url: &'a str,
        partition_name: &'a str,
        state: RequestedState,
        parameters: Option<&'a BTreeMap<String, String>>,
    ) -> ClientFuture<'a, ()>;

    /// Returns the latest installation status message for `release_url` on
    /// `node_id`.
    fn installation_status<'a>(
        &'a self,
        node_id: &'a str,
        release_url: &'a str,
    ) -> ClientFuture<'a, String>;

    /// Lists every partition bound to the logical name `partition_name`.
    fn list_bound_partitions<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, Vec<PartitionStatus>>;

    /// Fetches the most recent monitoring feed entry published under
    /// `base_url`, when the feed has any.
    fn monitoring_feed_entry<'a>(&'a self, base_url: &'a str)
    -> ClientFuture<'a, Option<FeedEntry>>;

    /// Returns the connection parameters of the root instance named
    /// `partition_name`.
    fn root_connection_parameters<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, BTreeMap<String, String>>;

    /// Promotes the clone named by `request` to primary. Fire-and-forget:
    /// the call returns once the orchestrator acknowledges the request.
    fn takeover<'a>(&'a self, request: &'a TakeoverRequest) -> ClientFuture<'a, ()>;
}
