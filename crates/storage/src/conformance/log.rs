//! Transition log conformance tests: ordering, filtering, limits and field
//! preservation of the append-only log.

use std::future::Future;

use super::{make_log_entry, seed_log, TestResult};
use crate::{NewTransitionLog, StateStorage, TransitionQuery};

pub(super) async fn run_log_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "log",
        "append_preserves_all_fields",
        append_preserves_all_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "ids_strictly_increase",
        ids_strictly_increase(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "entity_query_returns_newest_first",
        entity_query_returns_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "entity_query_filters_by_type_and_id",
        entity_query_filters_by_type_and_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "recent_query_filters_by_type",
        recent_query_filters_by_type(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "limit_caps_results",
        limit_caps_results(factory).await,
    ));
    results.push(TestResult::from_result(
        "log",
        "limit_zero_means_unbounded",
        limit_zero_means_unbounded(factory).await,
    ));

    results
}

async fn append_preserves_all_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let entry = NewTransitionLog {
        entity_type: "agenda".to_string(),
        entity_id: 7,
        from_state: Some("concluido".to_string()),
        to_state: "pendente".to_string(),
        reason: Some("manual correction".to_string()),
        acting_user_id: Some(3),
        forced: true,
    };
    seed_log(&s, entry.clone()).await?;

    let entries = s
        .list_transitions(&TransitionQuery::entity("agenda", 7, 0))
        .await
        .map_err(|e| e.to_string())?;
    let rec = entries.first().ok_or("entry missing after commit")?;

    if rec.entity_type != entry.entity_type
        || rec.entity_id != entry.entity_id
        || rec.from_state != entry.from_state
        || rec.to_state != entry.to_state
        || rec.reason != entry.reason
        || rec.acting_user_id != entry.acting_user_id
        || rec.forced != entry.forced
    {
        return Err(format!("stored entry differs: {:?}", rec));
    }
    if rec.created_at.is_empty() {
        return Err("created_at not set".to_string());
    }
    Ok(())
}

async fn ids_strictly_increase<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut last = i64::MIN;
    for i in 0..5 {
        let id = seed_log(&s, make_log_entry("pipeline", 1, None, "new")).await?;
        if id <= last {
            return Err(format!("append {i}: id {id} not greater than {last}"));
        }
        last = id;
    }
    Ok(())
}

async fn entity_query_returns_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_log(&s, make_log_entry("pipeline", 1, None, "new")).await?;
    seed_log(&s, make_log_entry("pipeline", 1, Some("new"), "contacted")).await?;
    seed_log(&s, make_log_entry("pipeline", 1, Some("contacted"), "qualified")).await?;

    let entries = s
        .list_transitions(&TransitionQuery::entity("pipeline", 1, 0))
        .await
        .map_err(|e| e.to_string())?;
    let order: Vec<&str> = entries.iter().map(|e| e.to_state.as_str()).collect();
    if order != ["qualified", "contacted", "new"] {
        return Err(format!("expected newest first, got {:?}", order));
    }
    Ok(())
}

async fn entity_query_filters_by_type_and_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_log(&s, make_log_entry("agenda", 1, None, "pendente")).await?;
    seed_log(&s, make_log_entry("agenda", 2, None, "pendente")).await?;
    seed_log(&s, make_log_entry("financial", 1, None, "pendente")).await?;

    let entries = s
        .list_transitions(&TransitionQuery::entity("agenda", 1, 0))
        .await
        .map_err(|e| e.to_string())?;
    if entries.len() != 1 {
        return Err(format!("expected 1 entry for agenda/1, got {}", entries.len()));
    }
    if entries[0].entity_type != "agenda" || entries[0].entity_id != 1 {
        return Err(format!(
            "wrong entry returned: {}/{}",
            entries[0].entity_type, entries[0].entity_id
        ));
    }
    Ok(())
}

async fn recent_query_filters_by_type<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_log(&s, make_log_entry("agenda", 1, None, "pendente")).await?;
    seed_log(&s, make_log_entry("agenda", 2, None, "pendente")).await?;
    seed_log(&s, make_log_entry("financial", 1, None, "pendente")).await?;

    let agenda = s
        .list_transitions(&TransitionQuery::recent(Some("agenda"), 0))
        .await
        .map_err(|e| e.to_string())?;
    let all = s
        .list_transitions(&TransitionQuery::recent(None, 0))
        .await
        .map_err(|e| e.to_string())?;

    if agenda.len() != 2 || agenda.iter().any(|e| e.entity_type != "agenda") {
        return Err(format!("agenda filter returned {:?}", agenda));
    }
    if all.len() != 3 {
        return Err(format!("unfiltered query returned {} entries", all.len()));
    }
    if all[0].entity_type != "financial" {
        return Err("global log is not newest first".to_string());
    }
    Ok(())
}

async fn limit_caps_results<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(seed_log(&s, make_log_entry("insight", 1, None, "novo")).await?);
    }

    let entries = s
        .list_transitions(&TransitionQuery::entity("insight", 1, 2))
        .await
        .map_err(|e| e.to_string())?;
    let got: Vec<i64> = entries.iter().map(|e| e.id).collect();
    let expected = vec![ids[4], ids[3]];
    if got != expected {
        return Err(format!("expected the 2 newest ids {:?}, got {:?}", expected, got));
    }
    Ok(())
}

async fn limit_zero_means_unbounded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StateStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for _ in 0..4 {
        seed_log(&s, make_log_entry("insight", 1, None, "novo")).await?;
    }
    let entries = s
        .list_transitions(&TransitionQuery::entity("insight", 1, 0))
        .await
        .map_err(|e| e.to_string())?;
    if entries.len() != 4 {
        return Err(format!("expected 4 entries, got {}", entries.len()));
    }
    Ok(())
}
