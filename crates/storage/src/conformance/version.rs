//! Version validation / OCC conformance tests.

use std::future::Future;

use super::{seed_state, TestResult};
use crate::{StateStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "version_increments_sequentially",
        version_increments_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_returns_conflict",
        update_with_wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_version_after_intervening_commit",
        stale_version_after_intervening_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_has_correct_fields",
        conflict_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_does_not_change_row",
        conflict_does_not_change_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "two_snapshots_race_one_wins",
        two_snapshots_race_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "second_update_same_snapshot_uses_new_version",
        second_update_same_snapshot_uses_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "version_survives_abort",
        version_survives_abort(factory).await,
    ));

    results
}

async fn update_once<S: StateStorage>(
    s: &S,
    entity_type: &str,
    entity_id: i64,
    expected_version: i64,
    new_state: &str,
) -> Result<i64, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    match s
        .update_current_state(&mut snap, entity_type, entity_id, expected_version, new_state, &[])
        .await
    {
        Ok(v) => {
            s.commit_snapshot(snap).await?;
            Ok(v)
        }
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn version_increments_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "process", 1, "ativo").await?;

    let walk = ["suspenso", "ativo", "concluido", "arquivado"];
    for (i, state) in walk.iter().enumerate() {
        let expected = i as i64;
        let v = update_once(&s, "process", 1, expected, state)
            .await
            .map_err(|e| format!("update {i}: {e}"))?;
        if v != expected + 1 {
            return Err(format!("update {i}: expected version {}, got {v}", expected + 1));
        }
    }

    let rec = s
        .get_current_state("process", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing")?;
    if rec.version != walk.len() as i64 {
        return Err(format!(
            "expected final version {}, got {}",
            walk.len(),
            rec.version
        ));
    }
    Ok(())
}

async fn update_with_wrong_version_returns_conflict<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;

    for wrong in [-1, 1, 99] {
        match update_once(&s, "agenda", 1, wrong, "concluido").await {
            Err(StorageError::ConcurrentConflict { .. }) => {}
            Err(e) => return Err(format!("version {wrong}: expected conflict, got {e}")),
            Ok(v) => return Err(format!("version {wrong}: update succeeded with {v}")),
        }
    }
    Ok(())
}

/// A writer that read version 0 loses once someone else has committed
/// version 1, even though no snapshot is open any more.
async fn stale_version_after_intervening_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "document", 9, "draft").await?;

    update_once(&s, "document", 9, 0, "review")
        .await
        .map_err(|e| format!("first update: {e}"))?;

    match update_once(&s, "document", 9, 0, "review").await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(v) => Err(format!("stale writer succeeded with version {v}")),
    }
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "insight", 11, "novo").await?;

    match update_once(&s, "insight", 11, 5, "resolvido").await {
        Err(StorageError::ConcurrentConflict {
            entity_type,
            entity_id,
            expected_version,
        }) => {
            if entity_type != "insight" || entity_id != 11 || expected_version != 5 {
                return Err(format!(
                    "conflict names {entity_type}/{entity_id}@{expected_version}"
                ));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(v) => Err(format!("update succeeded with {v}")),
    }
}

async fn conflict_does_not_change_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;
    let _ = update_once(&s, "agenda", 1, 3, "concluido").await;

    let rec = s
        .get_current_state("agenda", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing")?;
    if rec.current_state != "pendente" || rec.version != 0 {
        return Err(format!(
            "conflicting update changed row: state={} version={}",
            rec.current_state, rec.version
        ));
    }
    Ok(())
}

/// Two snapshots interleave on the same row: both read version 0, the first
/// writes, the second must lose, whether or not the first has committed yet.
async fn two_snapshots_race_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "document", 9, "draft").await?;

    let mut a = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut b = s.begin_snapshot().await.map_err(|e| e.to_string())?;

    let read_a = s
        .get_current_state_for_update(&mut a, "document", 9)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing for a")?;

    s.update_current_state(&mut a, "document", 9, read_a.version, "review", &[])
        .await
        .map_err(|e| format!("a update: {e}"))?;
    s.commit_snapshot(a).await.map_err(|e| e.to_string())?;

    let result_b = s
        .update_current_state(&mut b, "document", 9, read_a.version, "review", &[])
        .await;
    let _ = s.abort_snapshot(b).await;

    match result_b {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        Err(e) => Err(format!("b: expected ConcurrentConflict, got {e}")),
        Ok(v) => Err(format!("b also won the race with version {v}")),
    }
}

async fn second_update_same_snapshot_uses_new_version<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "process", 1, "ativo").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v1 = s
        .update_current_state(&mut snap, "process", 1, 0, "suspenso", &[])
        .await
        .map_err(|e| e.to_string())?;
    let v2 = s
        .update_current_state(&mut snap, "process", 1, v1, "ativo", &[])
        .await
        .map_err(|e| format!("second update at version {v1}: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if v2 != 2 {
        return Err(format!("expected version 2, got {v2}"));
    }
    Ok(())
}

async fn version_survives_abort<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let v = update_once(&s, "agenda", 1, 0, "concluido")
        .await
        .map_err(|e| format!("update after abort: {e}"))?;
    if v != 1 {
        return Err(format!("expected version 1 after abort, got {v}"));
    }
    Ok(())
}
