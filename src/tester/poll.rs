//! Remote-state derivation for the lifecycle tester.
//!
//! Software and instance states are never reported directly; they are
//! classified from free-form status messages. The prefixes matched here are
//! the orchestrator's wire convention and must not be reworded.

use chrono::{DateTime, FixedOffset, Utc};

use std::collections::BTreeMap;

use crate::client::{FailureKind, FeedEntry, OrchestratorClient, PartitionStatus, StatusMessage};

use super::{InstanceSnapshot, InstanceState, ReleaseTester, SoftwareState, TesterError};

/// Connection parameter holding a partition's monitoring URL.
pub const MONITOR_URL_KEY: &str = "monitor_v6_url";

const STOPPED_PREFIX: &str = "#access Instance correctly stopped";

pub(super) fn classify_software(message: &str) -> SoftwareState {
    if message.starts_with("#error no data found") {
        SoftwareState::Unknown
    } else if message.starts_with("#access software release") {
        SoftwareState::Installed
    } else if message.starts_with("#error") {
        SoftwareState::Installing
    } else {
        SoftwareState::Unknown
    }
}

fn parse_created_at(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value).ok()
}

/// Classifies a non-slave partition from its newest status message. Without
/// a parseable timestamp the report is stale bookkeeping, not a state.
pub(super) fn classify_status(news: Option<&StatusMessage>) -> InstanceState {
    let Some(message) = news else {
        return InstanceState::Unknown;
    };
    if message
        .created_at
        .as_deref()
        .and_then(parse_created_at)
        .is_none()
    {
        return InstanceState::Unknown;
    }
    if message.text.starts_with("#error") {
        InstanceState::StartedWithError
    } else if message.text.starts_with(STOPPED_PREFIX) {
        InstanceState::Stopped
    } else if message.text.starts_with("#access") {
        InstanceState::Started
    } else {
        InstanceState::Unknown
    }
}

pub(super) fn status_age_secs(news: Option<&StatusMessage>, now: DateTime<Utc>) -> Option<i64> {
    let created_at = news?.created_at.as_deref().and_then(parse_created_at)?;
    Some(now.signed_duration_since(created_at).num_seconds())
}

/// Folds per-partition states into one verdict. The first non-slave
/// `Unknown`/`StartedWithError` wins, then any slave `Unknown`; a mix of
/// `Started` and `Stopped` partitions yields `Unknown`, as does an empty
/// poll.
pub(super) fn aggregate_instance_state(snapshots: &[InstanceSnapshot]) -> InstanceState {
    let mut started = false;
    let mut stopped = false;
    for snapshot in snapshots {
        if !snapshot.is_slave {
            match snapshot.state {
                InstanceState::Unknown | InstanceState::StartedWithError => {
                    return snapshot.state;
                }
                InstanceState::Started => started = true,
                InstanceState::Stopped => stopped = true,
            }
        } else if snapshot.state == InstanceState::Unknown {
            return InstanceState::Unknown;
        }
    }

    match (started, stopped) {
        (true, false) => InstanceState::Started,
        (false, true) => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

impl<C> ReleaseTester<C>
where
    C: OrchestratorClient,
{
    pub(super) async fn software_state(&self) -> Result<SoftwareState, TesterError> {
        let Some(node_id) = self.target.node_id.as_deref() else {
            return Ok(SoftwareState::Installed);
        };
        let message = self
            .retry
            .run("installation status", || {
                self.client
                    .installation_status(node_id, &self.target.release_url)
            })
            .await?;
        let state = classify_software(&message);
        tracing::debug!(%state, message, "software state");
        Ok(state)
    }

    pub(super) async fn instance_state(&mut self) -> Result<InstanceState, TesterError> {
        if self.latest_requested_state.is_none() {
            return Ok(InstanceState::Unknown);
        }

        let partitions = match self
            .retry
            .run("partition listing", || {
                self.client
                    .list_bound_partitions(&self.target.partition_name)
            })
            .await
        {
            Ok(partitions) => partitions,
            Err(err) if err.kind() == FailureKind::Enumeration => {
                tracing::error!(%err, "partition enumeration failed, polling again later");
                return Ok(InstanceState::Unknown);
            }
            Err(err) => return Err(err.into()),
        };

        let mut snapshots = Vec::with_capacity(partitions.len());
        for partition in partitions {
            snapshots.push(self.snapshot_partition(partition).await);
        }

        let aggregate = aggregate_instance_state(&snapshots);
        self.history.push(snapshots);
        Ok(aggregate)
    }

    async fn snapshot_partition(&self, partition: PartitionStatus) -> InstanceSnapshot {
        let PartitionStatus {
            title,
            is_slave,
            news,
            connection,
            parameters,
        } = partition;
        let newest = news.into_iter().next();

        let state = if is_slave {
            if connection.is_empty() {
                InstanceState::Unknown
            } else {
                InstanceState::Started
            }
        } else {
            classify_status(newest.as_ref())
        };

        let monitor = if state == InstanceState::StartedWithError {
            self.monitoring_entry(&connection).await
        } else {
            None
        };

        tracing::info!(partition = %title, %state, "partition state");
        InstanceSnapshot {
            title,
            is_slave,
            status_age_secs: status_age_secs(newest.as_ref(), Utc::now()),
            news: newest,
            connection,
            parameters,
            monitor,
            state,
        }
    }

    /// Best-effort fetch of the partition's monitoring feed. Failures
    /// degrade to a placeholder entry so a broken monitor never fails the
    /// poll.
    async fn monitoring_entry(
        &self,
        connection: &BTreeMap<String, String>,
    ) -> Option<FeedEntry> {
        let base_url = connection.get(MONITOR_URL_KEY)?;
        match self
            .retry
            .run("monitoring feed", || {
                self.client.monitoring_feed_entry(base_url)
            })
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, %base_url, "unable to fetch monitoring feed");
                Some(FeedEntry {
                    date: String::new(),
                    message: String::from("unable to download monitoring feed"),
                    title: String::new(),
                })
            }
        }
    }
}
