//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted writes are discarded.

use std::future::Future;

use super::{make_log_entry, seed_state, TestResult};
use crate::{StateStorage, TransitionQuery};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "begin_commit_empty_snapshot_succeeds",
        begin_commit_empty_snapshot_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible_to_get",
        uncommitted_insert_invisible_to_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible_to_list",
        uncommitted_insert_invisible_to_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_log_entry_invisible",
        uncommitted_log_entry_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_insert",
        abort_discards_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_update",
        abort_discards_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "sequential_snapshots_see_prior_commits",
        sequential_snapshots_see_prior_commits(factory).await,
    ));

    results
}

async fn begin_commit_empty_snapshot_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn uncommitted_insert_invisible_to_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_current_state(&mut snap, "agenda", 1, "pendente", &[])
        .await
        .map_err(|e| e.to_string())?;

    let outside = s
        .get_current_state("agenda", 1)
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.abort_snapshot(snap).await;

    if outside.is_some() {
        return Err("uncommitted insert visible outside the snapshot".to_string());
    }
    Ok(())
}

async fn uncommitted_insert_invisible_to_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_current_state(&mut snap, "agenda", 1, "pendente", &[])
        .await
        .map_err(|e| e.to_string())?;

    let rows = s
        .list_current_states(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.abort_snapshot(snap).await;

    if !rows.is_empty() {
        return Err(format!("expected no committed rows, got {}", rows.len()));
    }
    Ok(())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "agenda", 1, 0, "concluido", &[])
        .await
        .map_err(|e| e.to_string())?;

    let outside = s
        .get_current_state("agenda", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded row missing")?;
    let _ = s.abort_snapshot(snap).await;

    if outside.current_state != "pendente" || outside.version != 0 {
        return Err(format!(
            "uncommitted update leaked: state={} version={}",
            outside.current_state, outside.version
        ));
    }
    Ok(())
}

async fn uncommitted_log_entry_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_transition(&mut snap, make_log_entry("agenda", 1, None, "pendente"))
        .await
        .map_err(|e| e.to_string())?;

    let entries = s
        .list_transitions(&TransitionQuery::recent(None, 0))
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.abort_snapshot(snap).await;

    if !entries.is_empty() {
        return Err(format!(
            "uncommitted log entry visible: {} entries",
            entries.len()
        ));
    }
    Ok(())
}

async fn abort_discards_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_current_state(&mut snap, "agenda", 1, "pendente", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s
        .get_current_state("agenda", 1)
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("aborted insert is visible".to_string());
    }
    // The key must be free again after the abort.
    seed_state(&s, "agenda", 1, "pendente").await
}

async fn abort_discards_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "agenda", 1, 0, "concluido", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s
        .get_current_state("agenda", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded row missing")?;
    if rec.current_state != "pendente" || rec.version != 0 {
        return Err(format!(
            "aborted update applied: state={} version={}",
            rec.current_state, rec.version
        ));
    }
    Ok(())
}

/// A snapshot dropped without commit or abort must roll back and must not
/// leave the row locked.
async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;

    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.update_current_state(&mut snap, "agenda", 1, 0, "concluido", &[])
            .await
            .map_err(|e| e.to_string())?;
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .update_current_state(&mut snap, "agenda", 1, 0, "concluido", &[])
        .await
        .map_err(|e| format!("update after dropped snapshot: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if v != 1 {
        return Err(format!("expected version 1, got {v}"));
    }
    Ok(())
}

async fn sequential_snapshots_see_prior_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "document", 9, "draft").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "document", 9, 0, "review", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let seen = s
        .get_current_state_for_update(&mut snap, "document", 9)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing in later snapshot")?;
    let _ = s.abort_snapshot(snap).await;

    if seen.current_state != "review" || seen.version != 1 {
        return Err(format!(
            "later snapshot saw state={} version={}",
            seen.current_state, seen.version
        ));
    }
    Ok(())
}
