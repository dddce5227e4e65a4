use std::future::Future;

use super::{make_log_entry, next_states, seed_state, TestResult};
use crate::{StateStorage, TransitionQuery};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // State row + log entry atomicity
    results.push(TestResult::from_result(
        "commit",
        "state_and_log_both_visible_after_commit",
        state_and_log_both_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "state_and_log_neither_visible_after_abort",
        state_and_log_neither_visible_after_abort(factory).await,
    ));

    // Multi-row atomicity
    results.push(TestResult::from_result(
        "commit",
        "multi_row_updates_all_visible_after_commit",
        multi_row_updates_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_row_updates_none_visible_after_abort",
        multi_row_updates_none_visible_after_abort(factory).await,
    ));

    // Field preservation
    results.push(TestResult::from_result(
        "commit",
        "update_replaces_allowed_next_states",
        update_replaces_allowed_next_states(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "update_refreshes_updated_at",
        update_refreshes_updated_at(factory).await,
    ));

    results
}

/// The first-transition pipeline: insert the row and append its log entry
/// in one snapshot, then commit.
async fn state_and_log_both_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_current_state(&mut snap, "agenda", 7, "pendente", &next_states(&["concluido"]))
        .await
        .map_err(|e| e.to_string())?;
    s.append_transition(&mut snap, make_log_entry("agenda", 7, None, "pendente"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let state = s
        .get_current_state("agenda", 7)
        .await
        .map_err(|e| e.to_string())?;
    let log = s
        .list_transitions(&TransitionQuery::entity("agenda", 7, 0))
        .await
        .map_err(|e| e.to_string())?;

    if state.is_none() {
        return Err("state row missing after commit".to_string());
    }
    if log.len() != 1 {
        return Err(format!("expected 1 log entry, got {}", log.len()));
    }
    Ok(())
}

async fn state_and_log_neither_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 7, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "agenda", 7, 0, "concluido", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.append_transition(
        &mut snap,
        make_log_entry("agenda", 7, Some("pendente"), "concluido"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let state = s
        .get_current_state("agenda", 7)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded row missing")?;
    let log = s
        .list_transitions(&TransitionQuery::entity("agenda", 7, 0))
        .await
        .map_err(|e| e.to_string())?;

    if state.current_state != "pendente" {
        return Err(format!(
            "aborted update applied: state={}",
            state.current_state
        ));
    }
    if !log.is_empty() {
        return Err(format!("aborted log entry visible: {} entries", log.len()));
    }
    Ok(())
}

async fn multi_row_updates_all_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in 1..=3 {
        seed_state(&s, "pipeline", id, "new").await?;
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for id in 1..=3 {
        s.update_current_state(&mut snap, "pipeline", id, 0, "contacted", &[])
            .await
            .map_err(|e| format!("update pipeline/{id}: {e}"))?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for id in 1..=3 {
        let rec = s
            .get_current_state("pipeline", id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("pipeline/{id} missing"))?;
        if rec.current_state != "contacted" {
            return Err(format!(
                "pipeline/{id}: expected \"contacted\", got \"{}\"",
                rec.current_state
            ));
        }
    }
    Ok(())
}

async fn multi_row_updates_none_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in 1..=3 {
        seed_state(&s, "pipeline", id, "new").await?;
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for id in 1..=3 {
        s.update_current_state(&mut snap, "pipeline", id, 0, "lost", &[])
            .await
            .map_err(|e| format!("update pipeline/{id}: {e}"))?;
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    for id in 1..=3 {
        let rec = s
            .get_current_state("pipeline", id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("pipeline/{id} missing"))?;
        if rec.current_state != "new" {
            return Err(format!(
                "pipeline/{id}: aborted update applied, state \"{}\"",
                rec.current_state
            ));
        }
    }
    Ok(())
}

async fn update_replaces_allowed_next_states<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "process", 1, "ativo").await?;

    let allowed = next_states(&["ativo", "arquivado"]);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "process", 1, 0, "suspenso", &allowed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s
        .get_current_state("process", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing")?;
    if rec.allowed_next_states != allowed {
        return Err(format!(
            "expected allowed_next_states {:?}, got {:?}",
            allowed, rec.allowed_next_states
        ));
    }
    Ok(())
}

async fn update_refreshes_updated_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "client", 1, "pending").await?;
    let before = s
        .get_current_state("client", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing")?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_current_state(&mut snap, "client", 1, 0, "active", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let after = s
        .get_current_state("client", 1)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing")?;
    if after.updated_at.is_empty() {
        return Err("updated_at empty after update".to_string());
    }
    // RFC 3339 UTC strings compare lexicographically.
    if after.updated_at < before.updated_at {
        return Err(format!(
            "updated_at went backwards: {} -> {}",
            before.updated_at, after.updated_at
        ));
    }
    Ok(())
}
