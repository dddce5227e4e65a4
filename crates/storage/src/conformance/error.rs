use std::future::Future;

use super::TestResult;
use crate::{StateStorage, StorageError, TransitionQuery};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_current_state_absent_is_none",
        get_current_state_absent_is_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_current_state_for_update_absent_is_none",
        get_current_state_for_update_absent_is_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_nonexistent_returns_entity_not_found",
        update_nonexistent_returns_entity_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "list_transitions_empty_for_unknown_entity",
        list_transitions_empty_for_unknown_entity(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "list_current_states_empty_for_unknown_type",
        list_current_states_empty_for_unknown_type(factory).await,
    ));

    results
}

/// An entity that never transitioned is a valid "absent" answer, not an error.
async fn get_current_state_absent_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_current_state("agenda", 404).await {
        Ok(None) => Ok(()),
        Ok(Some(rec)) => Err(format!("expected None, got {:?}", rec)),
        Err(e) => Err(format!("expected Ok(None), got error: {e}")),
    }
}

async fn get_current_state_for_update_absent_is_none<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_current_state_for_update(&mut snap, "agenda", 404).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Ok(None) => Ok(()),
        Ok(Some(rec)) => Err(format!("expected None, got {:?}", rec)),
        Err(e) => Err(format!("expected Ok(None), got error: {e}")),
    }
}

async fn update_nonexistent_returns_entity_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_current_state(&mut snap, "agenda", 404, 0, "concluido", &[])
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::EntityNotFound {
            entity_type,
            entity_id,
        }) => {
            if entity_type != "agenda" || entity_id != 404 {
                return Err(format!("error names {entity_type}/{entity_id}"));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected EntityNotFound, got {e}")),
        Ok(v) => Err(format!("update of missing row returned version {v}")),
    }
}

async fn list_transitions_empty_for_unknown_entity<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let entries = s
        .list_transitions(&TransitionQuery::entity("agenda", 404, 50))
        .await
        .map_err(|e| e.to_string())?;
    if !entries.is_empty() {
        return Err(format!("expected no entries, got {}", entries.len()));
    }
    Ok(())
}

async fn list_current_states_empty_for_unknown_type<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rows = s
        .list_current_states(Some("nonexistent"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if !rows.is_empty() {
        return Err(format!("expected no rows, got {}", rows.len()));
    }
    Ok(())
}
