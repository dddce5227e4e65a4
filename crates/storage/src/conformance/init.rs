use std::future::Future;

use super::{next_states, seed_state, TestResult};
use crate::{StateStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_creates_row_at_version_0",
        insert_creates_row_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_preserves_state_and_allowed_next",
        insert_preserves_state_and_allowed_next(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_row_readable_inside_snapshot",
        inserted_row_readable_inside_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "double_insert_same_snapshot_returns_already_initialized",
        double_insert_same_snapshot_returns_already_initialized(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "double_insert_across_snapshots_returns_already_initialized",
        double_insert_across_snapshots_returns_already_initialized(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "already_initialized_error_has_correct_fields",
        already_initialized_error_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "same_id_different_entity_types_are_independent",
        same_id_different_entity_types_are_independent(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_row_updatable",
        inserted_row_updatable(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// After insert + commit, the row version must be 0.
async fn insert_creates_row_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 7, "pendente").await?;

    let rec = s
        .get_current_state("agenda", 7)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing after commit")?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    Ok(())
}

/// The stored row carries exactly the state and allowed-next set given.
async fn insert_preserves_state_and_allowed_next<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let allowed = next_states(&["suspenso", "concluido", "arquivado"]);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let inserted = s
        .insert_current_state(&mut snap, "process", 3, "ativo", &allowed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s
        .get_current_state("process", 3)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("row missing after commit")?;
    if rec.current_state != "ativo" {
        return Err(format!(
            "expected state \"ativo\", got \"{}\"",
            rec.current_state
        ));
    }
    if rec.allowed_next_states != allowed {
        return Err(format!(
            "expected allowed_next_states {:?}, got {:?}",
            allowed, rec.allowed_next_states
        ));
    }
    if rec.entity_type != "process" || rec.entity_id != 3 {
        return Err(format!(
            "row keyed wrong: {}/{}",
            rec.entity_type, rec.entity_id
        ));
    }
    if inserted != rec {
        return Err("record returned by insert differs from committed row".to_string());
    }
    Ok(())
}

/// A row inserted in a snapshot is visible to reads through that snapshot.
async fn inserted_row_readable_inside_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_current_state(&mut snap, "client", 1, "pending", &[])
        .await
        .map_err(|e| e.to_string())?;
    let seen = s
        .get_current_state_for_update(&mut snap, "client", 1)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match seen {
        Some(rec) if rec.current_state == "pending" => Ok(()),
        Some(rec) => Err(format!("expected \"pending\", got \"{}\"", rec.current_state)),
        None => Err("own insert not visible inside snapshot".to_string()),
    }
}

async fn double_insert_same_snapshot_returns_already_initialized<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
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
    let second = s
        .insert_current_state(&mut snap, "agenda", 1, "pendente", &[])
        .await;
    let _ = s.abort_snapshot(snap).await;

    match second {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyInitialized, got {e}")),
        Ok(_) => Err("second insert in same snapshot succeeded".to_string()),
    }
}

async fn double_insert_across_snapshots_returns_already_initialized<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 1, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let second = s
        .insert_current_state(&mut snap, "agenda", 1, "concluido", &[])
        .await;
    let _ = s.abort_snapshot(snap).await;

    match second {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyInitialized, got {e}")),
        Ok(_) => Err("insert over committed row succeeded".to_string()),
    }
}

async fn already_initialized_error_has_correct_fields<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "financial", 42, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let second = s
        .insert_current_state(&mut snap, "financial", 42, "pendente", &[])
        .await;
    let _ = s.abort_snapshot(snap).await;

    match second {
        Err(StorageError::AlreadyInitialized {
            entity_type,
            entity_id,
        }) => {
            if entity_type != "financial" || entity_id != 42 {
                return Err(format!(
                    "error names {entity_type}/{entity_id}, expected financial/42"
                ));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected AlreadyInitialized, got {e}")),
        Ok(_) => Err("duplicate insert succeeded".to_string()),
    }
}

/// Entity ids are scoped by entity type: agenda/5 and financial/5 are
/// different rows.
async fn same_id_different_entity_types_are_independent<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 5, "pendente").await?;
    seed_state(&s, "financial", 5, "pago").await?;

    let agenda = s
        .get_current_state("agenda", 5)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("agenda/5 missing")?;
    let financial = s
        .get_current_state("financial", 5)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("financial/5 missing")?;
    if agenda.current_state != "pendente" || financial.current_state != "pago" {
        return Err(format!(
            "rows bled into each other: agenda={}, financial={}",
            agenda.current_state, financial.current_state
        ));
    }
    Ok(())
}

async fn inserted_row_updatable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_state(&s, "agenda", 7, "pendente").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .update_current_state(&mut snap, "agenda", 7, 0, "concluido", &[])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if v != 1 {
        return Err(format!("expected new version 1, got {v}"));
    }
    Ok(())
}
