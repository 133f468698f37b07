//! Behavioural scenarios for the lifecycle tester, driven through the
//! public API with a scripted orchestrator client.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use shakedown::test_support::{RecordedCall, ScriptedClient};
use shakedown::{
    ReleaseTester, RequestedState, SupplyState, TestTarget, TesterError, TesterState,
};

const SOFTWARE_TIMEOUT: Duration = Duration::from_secs(3600);
const INSTANCE_TIMEOUT: Duration = Duration::from_secs(3600);

fn software_only_tester(client: ScriptedClient) -> ReleaseTester<ScriptedClient> {
    let target = TestTarget::builder()
        .release_url("https://example.org/release.cfg")
        .partition_name("test0")
        .node_id(Some(String::from("c1")))
        .build()
        .expect("target should validate");
    ReleaseTester::new(client, target, SOFTWARE_TIMEOUT, INSTANCE_TIMEOUT)
}

fn full_tester(client: ScriptedClient) -> ReleaseTester<ScriptedClient> {
    let target = TestTarget::builder()
        .release_url("https://example.org/release.cfg")
        .partition_name("test0")
        .node_id(Some(String::from("c1")))
        .parameters(Some(BTreeMap::from([(
            String::from("memory"),
            String::from("2G"),
        )])))
        .build()
        .expect("target should validate");
    ReleaseTester::new(client, target, SOFTWARE_TIMEOUT, INSTANCE_TIMEOUT)
}

fn supply_states(client: &ScriptedClient) -> Vec<SupplyState> {
    client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RecordedCall::Supply { state, .. } => Some(state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn software_only_test_completes_after_two_installation_polls() {
    let client = ScriptedClient::new();
    client.push_installation_status("#error building software");
    client.push_installation_status("#access software release");
    let mut tester = software_only_tester(client.clone());
    let start = Instant::now();

    tester.tick(start).await.expect("initial tick");
    assert_eq!(tester.state(), TesterState::Nothing);

    tester
        .tick(start + Duration::from_secs(30))
        .await
        .expect("first poll");
    assert_eq!(tester.state(), TesterState::Nothing);

    tester
        .tick(start + Duration::from_secs(60))
        .await
        .expect("second poll");
    assert_eq!(tester.state(), TesterState::InstanceUninstalled);

    let finished = tester
        .tick(start + Duration::from_secs(90))
        .await
        .expect("terminal tick");
    assert_eq!(finished, None);

    // Exactly two installation polls, no instance stage at all.
    assert_eq!(
        client.count_calls(|call| matches!(call, RecordedCall::InstallationStatus { .. })),
        2
    );
    assert_eq!(
        client.count_calls(|call| matches!(call, RecordedCall::RequestInstance { .. })),
        0
    );
    assert_eq!(tester.latest_requested_state(), None);
    assert_eq!(
        supply_states(&client),
        vec![SupplyState::Available, SupplyState::Destroyed]
    );
}

#[tokio::test]
async fn timeout_reports_the_stalled_state() {
    let client = ScriptedClient::new();
    let mut tester = full_tester(client);
    let start = Instant::now();

    tester.tick(start).await.expect("initial tick");
    let err = tester
        .tick(start + SOFTWARE_TIMEOUT + Duration::from_secs(1))
        .await
        .expect_err("expired stage must fail");

    assert_eq!(
        err,
        TesterError::DeadlineExceeded {
            state: TesterState::Nothing
        }
    );
    assert!(err.to_string().contains("nothing"), "got: {err}");
}

#[tokio::test]
async fn repeated_ticks_before_the_condition_are_idempotent() {
    let client = ScriptedClient::new();
    for _ in 0..3 {
        client.push_installation_status("#error building software");
    }
    let mut tester = full_tester(client);
    let start = Instant::now();

    let armed = tester.tick(start).await.expect("initial tick");
    for offset in 1..=3_u64 {
        let deadline = tester
            .tick(start + Duration::from_secs(offset * 30))
            .await
            .expect("poll tick");
        assert_eq!(deadline, armed);
        assert_eq!(tester.state(), TesterState::Nothing);
    }
}

#[tokio::test]
async fn teardown_mid_run_destroys_instance_and_supply() {
    let client = ScriptedClient::new();
    client.push_installation_status("#error building software");
    let mut tester = full_tester(client.clone());
    let start = Instant::now();

    tester.tick(start).await.expect("initial tick");
    tester
        .tick(start + Duration::from_secs(30))
        .await
        .expect("poll tick");
    tester.teardown().await.expect("teardown should succeed");

    assert_eq!(tester.state(), TesterState::InstanceUninstalled);
    assert_eq!(
        client.count_calls(|call| matches!(
            call,
            RecordedCall::RequestInstance {
                state: RequestedState::Destroyed,
                ..
            }
        )),
        1
    );
    assert_eq!(
        client.count_calls(|call| matches!(
            call,
            RecordedCall::Supply {
                state: SupplyState::Destroyed,
                ..
            }
        )),
        1
    );
}
