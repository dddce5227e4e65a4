//! Conformance test suite for `StateStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `StateStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: first-time row creation, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: state row and log entry land together or not at all
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Transition log**: ordering, filtering, limits, field preservation
//! - **Concurrency**: real task races on the same and on different rows
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use statekeeper_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn mysql_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_mysql_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod init;
mod log;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::NewTransitionLog;
use crate::StateStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_creates_row_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(log::run_log_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn make_log_entry(
    entity_type: &str,
    entity_id: i64,
    from_state: Option<&str>,
    to_state: &str,
) -> NewTransitionLog {
    NewTransitionLog {
        entity_type: entity_type.to_string(),
        entity_id,
        from_state: from_state.map(str::to_string),
        to_state: to_state.to_string(),
        reason: None,
        acting_user_id: Some(1),
        forced: false,
    }
}

fn next_states(states: &[&str]) -> Vec<String> {
    states.iter().map(|s| s.to_string()).collect()
}

/// Create and commit a current-state row at version 0.
async fn seed_state<S: StateStorage>(
    s: &S,
    entity_type: &str,
    entity_id: i64,
    state: &str,
) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_current_state(&mut snap, entity_type, entity_id, state, &[])
        .await
        .map_err(|e| format!("insert {entity_type}/{entity_id}: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}

/// Append and commit one log entry in its own snapshot.
async fn seed_log<S: StateStorage>(s: &S, entry: NewTransitionLog) -> Result<i64, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let rec = s
        .append_transition(&mut snap, entry)
        .await
        .map_err(|e| format!("append: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit log: {e}"))?;
    Ok(rec.id)
}
