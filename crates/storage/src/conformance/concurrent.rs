use std::future::Future;
use std::sync::Arc;

use super::{make_log_entry, seed_state, TestResult};
use crate::{StateStorage, StorageError, TransitionQuery};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_exactly_one_wins",
        concurrent_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_entities_all_succeed",
        concurrent_updates_different_entities_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_race_leaves_one_log_entry",
        concurrent_race_leaves_one_log_entry(factory).await,
    ));

    results
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and attempt to update the same row from
/// version 0. Exactly one commit succeeds; the rest must get ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_state(storage.as_ref(), "document", 9, "draft").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s
                .update_current_state(&mut snap, "document", 9, 0, "review", &[])
                .await;
            match result {
                Ok(_new_version) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true) // won the race
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false) // lost the race
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let record = storage
        .get_current_state("document", 9)
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("row missing after race")?;
    if record.version != 1 || record.current_state != "review" {
        return Err(format!(
            "expected review@1 after race, got {}@{}",
            record.current_state, record.version
        ));
    }
    Ok(())
}

// ── Concurrent first insert: exactly one wins ───────────────────────────────

/// N tasks each attempt to create the same row. Exactly one succeeds;
/// the rest must get AlreadyInitialized.
async fn concurrent_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s
                .insert_current_state(&mut snap, "agenda", 7, "pendente", &[])
                .await;
            match result {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::AlreadyInitialized { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

// ── Concurrent updates to different entities: all succeed ───────────────────

/// N tasks each update a different row. All should succeed: no false
/// conflicts when there is no contention.
async fn concurrent_updates_different_entities_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_state(storage.as_ref(), "financial", i as i64, "pendente").await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.update_current_state(&mut snap, "financial", i as i64, 0, "pago", &[])
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for i in 0..N {
        let record = storage
            .get_current_state("financial", i as i64)
            .await
            .map_err(|e| format!("get financial/{i}: {e}"))?
            .ok_or_else(|| format!("financial/{i} missing"))?;
        if record.current_state != "pago" || record.version != 1 {
            return Err(format!(
                "financial/{i}: expected pago@1, got {}@{}",
                record.current_state, record.version
            ));
        }
    }
    Ok(())
}

// ── Race with log append: losers leave no trace ─────────────────────────────

/// Each task writes the row and appends its log entry in one snapshot, the
/// way the engine does. Only the winner's log entry may survive.
async fn concurrent_race_leaves_one_log_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_state(storage.as_ref(), "document", 9, "draft").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s
                .update_current_state(&mut snap, "document", 9, 0, "review", &[])
                .await
            {
                Ok(_) => {
                    s.append_transition(
                        &mut snap,
                        make_log_entry("document", 9, Some("draft"), "review"),
                    )
                    .await?;
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let entries = storage
        .list_transitions(&TransitionQuery::entity("document", 9, 0))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if entries.len() != 1 {
        return Err(format!("expected 1 log entry, got {}", entries.len()));
    }
    Ok(())
}

async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }
    Ok((winners, losers))
}
