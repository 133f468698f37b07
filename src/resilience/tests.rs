//! Unit tests for the resiliency harness and its helper seams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;
use thiserror::Error;

use crate::client::ClientError;
use crate::test_support::{RecordedCall, ScriptedClient};

use super::probe::probe_base;
use super::*;

#[derive(Debug, Error)]
#[error("workload failure: {0}")]
struct WorkloadFailure(String);

#[derive(Clone, Debug, Default)]
struct WorkloadLog {
    pushes: u32,
    verifies: u32,
}

/// Workload double replaying scripted verification verdicts.
struct ScriptedWorkload {
    verdicts: VecDeque<Result<bool, WorkloadFailure>>,
    push_result: Result<(), WorkloadFailure>,
    log: Arc<Mutex<WorkloadLog>>,
}

impl ScriptedWorkload {
    fn new(verdicts: impl IntoIterator<Item = bool>) -> Self {
        Self {
            verdicts: verdicts.into_iter().map(Ok).collect(),
            push_result: Ok(()),
            log: Arc::new(Mutex::new(WorkloadLog::default())),
        }
    }

    fn failing_push(message: &str) -> Self {
        Self {
            verdicts: VecDeque::new(),
            push_result: Err(WorkloadFailure(message.to_owned())),
            log: Arc::new(Mutex::new(WorkloadLog::default())),
        }
    }

    fn log(&self) -> WorkloadLog {
        self.log
            .lock()
            .unwrap_or_else(|err| panic!("workload log lock poisoned: {err}"))
            .clone()
    }
}

impl Workload for ScriptedWorkload {
    type Payload = String;
    type Error = WorkloadFailure;

    fn generate(&mut self) -> Self::Payload {
        String::from("payload-1")
    }

    fn push_to_primary<'a>(
        &'a mut self,
        _watcher: &'a dyn ParameterWatcher,
        _payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.log
                .lock()
                .unwrap_or_else(|err| panic!("workload log lock poisoned: {err}"))
                .pushes += 1;
            match &self.push_result {
                Ok(()) => Ok(()),
                Err(err) => Err(WorkloadFailure(err.0.clone())),
            }
        })
    }

    fn verify_on_new_primary<'a>(
        &'a mut self,
        _watcher: &'a dyn ParameterWatcher,
        _payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            self.log
                .lock()
                .unwrap_or_else(|err| panic!("workload log lock poisoned: {err}"))
                .verifies += 1;
            self.verdicts
                .pop_front()
                .unwrap_or_else(|| Err(WorkloadFailure(String::from("no scripted verdict"))))
        })
    }
}

fn session(total_instance_count: u32) -> ResiliencySession {
    ResiliencySession {
        release_url: String::from("https://example.org/release.cfg"),
        node_id: String::from("node-1"),
        partition_id: String::from("part-1"),
        namebase: String::from("kvm"),
        root_instance_name: String::from("kvm-root"),
        total_instance_count,
    }
}

fn harness(client: ScriptedClient, total: u32) -> ResiliencyHarness<ScriptedClient> {
    ResiliencyHarness::new(client, session(total))
        .unwrap_or_else(|err| panic!("session should validate: {err}"))
        .with_replication_wait(Duration::from_millis(1))
        .with_parameter_poll_interval(Duration::from_millis(1))
}

fn takeover_suffixes(client: &ScriptedClient) -> Vec<u32> {
    client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RecordedCall::Takeover(request) => Some(request.winner_suffix),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn suite_passes_when_every_clone_verifies() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone(), 3);
    let mut workload = ScriptedWorkload::new([true, true]);

    let outcome = runner
        .run_suite(&mut workload)
        .await
        .unwrap_or_else(|err| panic!("suite should run: {err}"));

    assert_eq!(outcome, SuiteOutcome::Passed);
    assert!(outcome.is_success());
    assert_eq!(takeover_suffixes(&client), vec![1, 2]);
    let log = workload.log();
    assert_eq!(log.pushes, 1);
    assert_eq!(log.verifies, 2);
}

#[tokio::test]
async fn suite_stops_at_first_failing_clone() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone(), 3);
    let mut workload = ScriptedWorkload::new([true, false]);

    let outcome = runner
        .run_suite(&mut workload)
        .await
        .unwrap_or_else(|err| panic!("suite should run: {err}"));

    assert_eq!(outcome, SuiteOutcome::Failed { clone_index: 2 });
    assert!(!outcome.is_success());
    // Clone 1 and clone 2 were promoted; a third takeover never happened.
    assert_eq!(takeover_suffixes(&client), vec![1, 2]);
    assert_eq!(workload.log().verifies, 2);
}

#[tokio::test]
async fn failing_clone_in_larger_set_skips_later_clones() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone(), 5);
    let mut workload = ScriptedWorkload::new([false]);

    let outcome = runner
        .run_suite(&mut workload)
        .await
        .unwrap_or_else(|err| panic!("suite should run: {err}"));

    assert_eq!(outcome, SuiteOutcome::Failed { clone_index: 1 });
    assert_eq!(takeover_suffixes(&client), vec![1]);
}

#[tokio::test]
async fn push_failure_aborts_before_any_takeover() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone(), 3);
    let mut workload = ScriptedWorkload::failing_push("primary unreachable");

    let err = runner
        .run_suite(&mut workload)
        .await
        .expect_err("push failure should abort the suite");

    assert!(matches!(err, HarnessError::Push(_)));
    assert!(takeover_suffixes(&client).is_empty());
}

#[tokio::test]
async fn rejected_takeover_surfaces_as_harness_error() {
    let client = ScriptedClient::new();
    client.push_takeover_error(ClientError::Api(String::from("rejected")));
    let runner = harness(client.clone(), 3);
    let mut workload = ScriptedWorkload::new([true, true]);

    let err = runner
        .run_suite(&mut workload)
        .await
        .expect_err("rejected takeover should abort the suite");

    assert!(matches!(err, HarnessError::Takeover(_)));
    assert_eq!(workload.log().verifies, 0);
}

#[tokio::test]
async fn wait_for_changed_parameter_skips_stale_and_sentinel_values() {
    let client = ScriptedClient::new();
    client.push_parameters(&[("ipv6", "2001:db8::1")]);
    client.push_parameters(&[("ipv6", "None")]);
    client.push_parameters(&[("other", "value")]);
    client.push_parameters(&[("ipv6", "2001:db8::2")]);
    let runner = harness(client.clone(), 3);

    let value = runner
        .wait_for_changed_parameter("ipv6", "2001:db8::1")
        .await
        .unwrap_or_else(|err| panic!("parameter should eventually change: {err}"));

    assert_eq!(value, "2001:db8::2");
    assert_eq!(
        client.count_calls(|call| matches!(call, RecordedCall::ConnectionParameters { .. })),
        4
    );
}

#[tokio::test]
async fn transient_parameter_fetch_failures_are_retried() {
    let client = ScriptedClient::new();
    client.push_parameters_error(ClientError::Transport(String::from("connection reset")));
    client.push_parameters(&[("ipv6", "2001:db8::1")]);
    let runner = harness(client.clone(), 3).with_retry_policy(
        RetryPolicy::default().with_initial_delay(Duration::from_millis(1)),
    );

    let value = runner
        .connection_parameter("ipv6")
        .await
        .unwrap_or_else(|err| panic!("fetch should succeed after a retry: {err}"));

    assert_eq!(value.as_deref(), Some("2001:db8::1"));
    assert_eq!(
        client.count_calls(|call| matches!(call, RecordedCall::ConnectionParameters { .. })),
        2
    );
}

#[tokio::test]
async fn connection_parameter_returns_current_value() {
    let client = ScriptedClient::new();
    client.push_parameters(&[("ipv6", "2001:db8::1")]);
    let runner = harness(client.clone(), 3);

    let value = runner
        .connection_parameter("ipv6")
        .await
        .unwrap_or_else(|err| panic!("fetch should succeed: {err}"));
    assert_eq!(value.as_deref(), Some("2001:db8::1"));
}

#[rstest]
#[case("release_url")]
#[case("node_id")]
#[case("partition_id")]
#[case("namebase")]
#[case("root_instance_name")]
fn session_rejects_blank_fields(#[case] field: &str) {
    let mut candidate = session(3);
    match field {
        "release_url" => candidate.release_url = String::from("  "),
        "node_id" => candidate.node_id = String::new(),
        "partition_id" => candidate.partition_id = String::from(" "),
        "namebase" => candidate.namebase = String::new(),
        _ => candidate.root_instance_name = String::new(),
    }
    let err = candidate.validate().expect_err("blank field should fail");
    assert_eq!(err, SessionError::Validation(field.to_owned()));
}

#[rstest]
#[case(0)]
#[case(1)]
fn session_rejects_counts_without_clones(#[case] total: u32) {
    let err = session(total)
        .validate()
        .expect_err("count without clones should fail");
    assert_eq!(
        err,
        SessionError::NoClones {
            total_instance_count: total
        }
    );
}

#[rstest]
#[case("192.0.2.7", 10080, "http://192.0.2.7:10080")]
#[case("2001:db8::1", 10080, "http://[2001:db8::1]:10080")]
#[case("primary.example.net", 8080, "http://primary.example.net:8080")]
fn probe_base_brackets_ipv6_literals(
    #[case] address: &str,
    #[case] port: u16,
    #[case] expected: &str,
) {
    assert_eq!(probe_base(address, port), expected);
}
