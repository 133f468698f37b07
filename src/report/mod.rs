//! Human-readable rendering of tester progress.
//!
//! The snapshot history drives no control flow; it exists so a human can
//! diagnose partial progress after a failure. [`last_message`] renders the
//! most recent poll: a one-line-per-partition summary followed by the raw
//! fields of every snapshot, with connection and instantiation parameters
//! pretty-printed as JSON.

use std::fmt::Write as _;

use crate::tester::{InstanceSnapshot, TestTarget};

const RULE_WIDTH: usize = 79;

fn json_block<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| String::from("null"))
}

/// Renders the identity of a release-under-test, as printed at the start of
/// a run.
#[must_use]
pub fn describe(target: &TestTarget) -> String {
    let mut info = String::new();
    writeln!(info, "Software Release URL: {}", target.release_url).ok();
    if let Some(node_id) = target.node_id.as_deref() {
        writeln!(info, "Supply requested on: {node_id}").ok();
    }
    let parameters = target
        .parameters
        .as_ref()
        .map_or_else(|| String::from("none"), json_block);
    writeln!(info, "Instance requested (parameters): {parameters}").ok();
    info
}

/// Renders the latest snapshot batch of `history`.
///
/// Returns `"No message"` when no poll has completed yet.
#[must_use]
pub fn last_message(history: &[Vec<InstanceSnapshot>]) -> String {
    let Some(latest) = history.last() else {
        return String::from("No message");
    };

    let mut summary = String::from("Summary about the test. Instance list and status:\n");
    let mut message = String::from("Last information about the tester:\n");
    for snapshot in latest {
        let slave_marker = if snapshot.is_slave { " (slave)" } else { "" };
        writeln!(
            summary,
            "{}{slave_marker} -> {}",
            snapshot.title, snapshot.state,
        )
        .ok();

        writeln!(message, "title = {}", json_block(&snapshot.title)).ok();
        writeln!(message, "slave = {}", json_block(&snapshot.is_slave)).ok();
        writeln!(message, "news = {}", json_block(&snapshot.news)).ok();
        writeln!(
            message,
            "status_age_secs = {}",
            json_block(&snapshot.status_age_secs),
        )
        .ok();
        writeln!(message, "monitor = {}", json_block(&snapshot.monitor)).ok();
        writeln!(message, "state = {}", json_block(&snapshot.state)).ok();
        writeln!(
            message,
            "=== connection parameters ===\n{}\n",
            json_block(&snapshot.connection),
        )
        .ok();
        writeln!(
            message,
            "=== instantiation parameters ===\n{}\n",
            json_block(&snapshot.parameters),
        )
        .ok();
    }
    writeln!(message, "{}\n\n", "=".repeat(RULE_WIDTH)).ok();

    summary + &message
}
