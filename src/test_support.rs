//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::{
    ClientError, ClientFuture, FeedEntry, OrchestratorClient, PartitionStatus, RequestedState,
    StatusMessage, SupplyState, TakeoverRequest,
};

/// A wire timestamp accepted by the status classifier.
pub const SAMPLE_TIMESTAMP: &str = "Tue, 01 Jul 2025 10:00:00 GMT";

/// Records a single call made through [`ScriptedClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordedCall {
    /// A supply request.
    Supply {
        /// Release supplied.
        release_url: String,
        /// Target node.
        node_id: String,
        /// Requested supply state.
        state: SupplyState,
    },
    /// An instance request.
    RequestInstance {
        /// Release requested.
        release_url: String,
        /// Logical partition reference.
        partition_name: String,
        /// Requested instance state.
        state: RequestedState,
        /// Instantiation parameters, when supplied.
        parameters: Option<BTreeMap<String, String>>,
    },
    /// An installation status poll.
    InstallationStatus {
        /// Polled node.
        node_id: String,
        /// Polled release.
        release_url: String,
    },
    /// A bound-partition listing.
    ListBoundPartitions {
        /// Polled logical name.
        partition_name: String,
    },
    /// A monitoring feed fetch.
    MonitoringFeed {
        /// Feed base URL.
        base_url: String,
    },
    /// A root connection-parameter fetch.
    ConnectionParameters {
        /// Polled root instance name.
        partition_name: String,
    },
    /// A takeover request.
    Takeover(TakeoverRequest),
}

#[derive(Debug, Default)]
struct ScriptedState {
    installation_statuses: VecDeque<Result<String, ClientError>>,
    partition_batches: VecDeque<Result<Vec<PartitionStatus>, ClientError>>,
    feed_entries: VecDeque<Result<Option<FeedEntry>, ClientError>>,
    parameter_batches: VecDeque<Result<BTreeMap<String, String>, ClientError>>,
    supply_results: VecDeque<Result<(), ClientError>>,
    request_results: VecDeque<Result<(), ClientError>>,
    takeover_results: VecDeque<Result<(), ClientError>>,
    calls: Vec<RecordedCall>,
}

/// Scripted orchestrator client that replays pre-seeded responses in FIFO
/// order and records every call.
///
/// Acknowledgement operations (supply, instance request, takeover) succeed
/// when no response is scripted; polls fail with an unscripted-response
/// error so a test cannot silently poll past its script.
#[derive(Clone, Debug, Default)]
pub struct ScriptedClient {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedClient {
    /// Creates a client with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, ScriptedState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("scripted client lock poisoned: {err}"))
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.locked().calls.clone()
    }

    /// Counts recorded calls matching `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&RecordedCall) -> bool) -> usize {
        self.locked().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Queues an installation status message.
    pub fn push_installation_status(&self, message: impl Into<String>) {
        self.locked()
            .installation_statuses
            .push_back(Ok(message.into()));
    }

    /// Queues an installation status failure.
    pub fn push_installation_error(&self, error: ClientError) {
        self.locked().installation_statuses.push_back(Err(error));
    }

    /// Queues one bound-partition batch.
    pub fn push_partitions(&self, partitions: Vec<PartitionStatus>) {
        self.locked().partition_batches.push_back(Ok(partitions));
    }

    /// Queues a bound-partition listing failure.
    pub fn push_partitions_error(&self, error: ClientError) {
        self.locked().partition_batches.push_back(Err(error));
    }

    /// Queues a monitoring feed entry.
    pub fn push_feed_entry(&self, entry: Option<FeedEntry>) {
        self.locked().feed_entries.push_back(Ok(entry));
    }

    /// Queues a monitoring feed failure.
    pub fn push_feed_error(&self, error: ClientError) {
        self.locked().feed_entries.push_back(Err(error));
    }

    /// Queues one root connection-parameter batch.
    pub fn push_parameters(&self, parameters: &[(&str, &str)]) {
        let batch = parameters
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        self.locked().parameter_batches.push_back(Ok(batch));
    }

    /// Queues a root connection-parameter failure.
    pub fn push_parameters_error(&self, error: ClientError) {
        self.locked().parameter_batches.push_back(Err(error));
    }

    /// Queues a supply failure.
    pub fn push_supply_error(&self, error: ClientError) {
        self.locked().supply_results.push_back(Err(error));
    }

    /// Queues an instance request failure.
    pub fn push_request_error(&self, error: ClientError) {
        self.locked().request_results.push_back(Err(error));
    }

    /// Queues a takeover failure.
    pub fn push_takeover_error(&self, error: ClientError) {
        self.locked().takeover_results.push_back(Err(error));
    }

    fn unscripted() -> ClientError {
        ClientError::Api(String::from("no scripted response available"))
    }
}

impl OrchestratorClient for ScriptedClient {
    fn supply<'a>(
        &'a self,
        release_url: &'a str,
        node_id: &'a str,
        state: SupplyState,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::Supply {
                release_url: release_url.to_owned(),
                node_id: node_id.to_owned(),
                state,
            });
            scripted.supply_results.pop_front().unwrap_or(Ok(()))
        })
    }

    fn request_instance<'a>(
        &'a self,
        release_url: &'a str,
        partition_name: &'a str,
        state: RequestedState,
        parameters: Option<&'a BTreeMap<String, String>>,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::RequestInstance {
                release_url: release_url.to_owned(),
                partition_name: partition_name.to_owned(),
                state,
                parameters: parameters.cloned(),
            });
            scripted.request_results.pop_front().unwrap_or(Ok(()))
        })
    }

    fn installation_status<'a>(
        &'a self,
        node_id: &'a str,
        release_url: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::InstallationStatus {
                node_id: node_id.to_owned(),
                release_url: release_url.to_owned(),
            });
            scripted
                .installation_statuses
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted()))
        })
    }

    fn list_bound_partitions<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, Vec<PartitionStatus>> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::ListBoundPartitions {
                partition_name: partition_name.to_owned(),
            });
            scripted
                .partition_batches
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted()))
        })
    }

    fn monitoring_feed_entry<'a>(
        &'a self,
        base_url: &'a str,
    ) -> ClientFuture<'a, Option<FeedEntry>> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::MonitoringFeed {
                base_url: base_url.to_owned(),
            });
            scripted
                .feed_entries
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted()))
        })
    }

    fn root_connection_parameters<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, BTreeMap<String, String>> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::ConnectionParameters {
                partition_name: partition_name.to_owned(),
            });
            scripted
                .parameter_batches
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted()))
        })
    }

    fn takeover<'a>(&'a self, request: &'a TakeoverRequest) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut scripted = self.locked();
            scripted.calls.push(RecordedCall::Takeover(request.clone()));
            scripted.takeover_results.pop_front().unwrap_or(Ok(()))
        })
    }
}

/// Produces a non-slave partition whose newest status message carries `text`
/// and a parseable timestamp.
#[must_use]
pub fn reporting_partition(title: &str, text: &str) -> PartitionStatus {
    PartitionStatus {
        title: title.to_owned(),
        is_slave: false,
        news: vec![StatusMessage {
            created_at: Some(SAMPLE_TIMESTAMP.to_owned()),
            text: text.to_owned(),
        }],
        connection: BTreeMap::new(),
        parameters: BTreeMap::new(),
    }
}

/// Produces a slave partition publishing the given connection parameters.
#[must_use]
pub fn slave_partition(title: &str, connection: &[(&str, &str)]) -> PartitionStatus {
    PartitionStatus {
        title: title.to_owned(),
        is_slave: true,
        news: Vec::new(),
        connection: connection
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect(),
        parameters: BTreeMap::new(),
    }
}
