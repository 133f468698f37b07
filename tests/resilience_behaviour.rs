//! Behavioural scenario for the resiliency harness: a three-instance
//! deployment whose second clone loses the payload.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shakedown::test_support::{RecordedCall, ScriptedClient};
use shakedown::{
    ParameterWatcher, ResiliencyHarness, ResiliencySession, SuiteOutcome, Workload,
    resilience::WorkloadFuture,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("verification could not run: {0}")]
struct VerifyFailure(String);

struct CountingWorkload {
    verdicts: Arc<Mutex<VecDeque<bool>>>,
}

impl CountingWorkload {
    fn new(verdicts: impl IntoIterator<Item = bool>) -> Self {
        Self {
            verdicts: Arc::new(Mutex::new(verdicts.into_iter().collect())),
        }
    }
}

impl Workload for CountingWorkload {
    type Payload = String;
    type Error = VerifyFailure;

    fn generate(&mut self) -> Self::Payload {
        String::from("replicated-key")
    }

    fn push_to_primary<'a>(
        &'a mut self,
        _watcher: &'a dyn ParameterWatcher,
        _payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, (), Self::Error> {
        Box::pin(async move { Ok(()) })
    }

    fn verify_on_new_primary<'a>(
        &'a mut self,
        _watcher: &'a dyn ParameterWatcher,
        _payload: &'a Self::Payload,
    ) -> WorkloadFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            self.verdicts
                .lock()
                .unwrap_or_else(|err| panic!("verdict lock poisoned: {err}"))
                .pop_front()
                .ok_or_else(|| VerifyFailure(String::from("no verdict scripted")))
        })
    }
}

fn harness(client: ScriptedClient) -> ResiliencyHarness<ScriptedClient> {
    let session = ResiliencySession {
        release_url: String::from("https://example.org/release.cfg"),
        node_id: String::from("node-1"),
        partition_id: String::from("part-1"),
        namebase: String::from("kvm"),
        root_instance_name: String::from("kvm-root"),
        total_instance_count: 3,
    };
    ResiliencyHarness::new(client, session)
        .expect("session should validate")
        .with_replication_wait(Duration::from_millis(1))
        .with_parameter_poll_interval(Duration::from_millis(1))
}

#[tokio::test]
async fn second_clone_failure_stops_after_two_takeovers() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone());
    let mut workload = CountingWorkload::new([true, false]);

    let outcome = runner
        .run_suite(&mut workload)
        .await
        .expect("suite should run to a verdict");

    assert_eq!(outcome, SuiteOutcome::Failed { clone_index: 2 });

    let takeovers: Vec<u32> = client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RecordedCall::Takeover(request) => Some(request.winner_suffix),
            _ => None,
        })
        .collect();
    assert_eq!(takeovers, vec![1, 2], "a third takeover must never happen");
}

#[tokio::test]
async fn all_clones_passing_yields_success() {
    let client = ScriptedClient::new();
    let runner = harness(client.clone());
    let mut workload = CountingWorkload::new([true, true]);

    let outcome = runner
        .run_suite(&mut workload)
        .await
        .expect("suite should run to a verdict");

    assert_eq!(outcome, SuiteOutcome::Passed);
    assert_eq!(
        client.count_calls(|call| matches!(call, RecordedCall::Takeover(_))),
        2
    );
}
