//! Unit tests for the lifecycle state machine.


use std::collections::BTreeMap;
use std::time::Duration;

use crate::test_support::ScriptedClient;

use super::*;

const SOFTWARE_TIMEOUT: Duration = Duration::from_secs(3600);
const INSTANCE_TIMEOUT: Duration = Duration::from_secs(1800);

fn target_with_instance() -> TestTarget {
    TestTarget {
        release_url: String::from("https://example.org/release.cfg"),
        partition_name: String::from("test0"),
        node_id: Some(String::from("node-1")),
        parameters: Some(BTreeMap::from([(
            String::from("memory"),
            String::from("2G"),
        )])),
    }
}

fn software_only_target() -> TestTarget {
    TestTarget {
        release_url: String::from("https://example.org/release.cfg"),
        partition_name: String::from("test0"),
        node_id: Some(String::from("c1")),
        parameters: None,
    }
}

fn tester(client: ScriptedClient, target: TestTarget) -> ReleaseTester<ScriptedClient> {
    ReleaseTester::new(client, target, SOFTWARE_TIMEOUT, INSTANCE_TIMEOUT)
}
