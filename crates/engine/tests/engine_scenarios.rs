//! End-to-end engine behaviour against the in-memory backend.

mod common;

use std::sync::Arc;

use statekeeper_engine::{
    verify_walk, EngineConfig, EngineError, EntityType, ErrorKind, StateDefinition, StateEngine,
    TransitionTables, ValidationError,
};
use statekeeper_storage::{InMemoryStorage, StateStorage};

use common::Wrapped;

fn engine() -> StateEngine<InMemoryStorage> {
    StateEngine::builtin(Arc::new(InMemoryStorage::new()))
}

async fn state_of<S: StateStorage>(
    engine: &StateEngine<S>,
    ty: EntityType,
    id: i64,
) -> Option<String> {
    engine
        .get_current_state(ty, id)
        .await
        .unwrap()
        .map(|s| s.current_state)
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_1_initial_state_must_be_established_first() {
    let engine = engine();

    let err = engine
        .transition_state(EntityType::Agenda, 7, "concluido", None, None)
        .await
        .unwrap_err();
    match &err {
        EngineError::TransitionNotAllowed {
            from_state,
            to_state,
            ..
        } => {
            assert_eq!(*from_state, None);
            assert_eq!(to_state, "concluido");
        }
        other => panic!("expected TransitionNotAllowed, got {other}"),
    }
    assert_eq!(state_of(&engine, EntityType::Agenda, 7).await, None);

    engine
        .transition_state(EntityType::Agenda, 7, "pendente", None, None)
        .await
        .unwrap();
    let current = engine
        .get_current_state(EntityType::Agenda, 7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.current_state, "pendente");
    assert_eq!(current.allowed_next_states, vec!["concluido"]);
    assert_eq!(current.version, 0);

    let outcome = engine
        .transition_state(EntityType::Agenda, 7, "concluido", None, Some(3))
        .await
        .unwrap();
    assert_eq!(outcome.from_state.as_deref(), Some("pendente"));
    assert_eq!(outcome.version, 1);
    assert!(!outcome.forced);
}

#[tokio::test]
async fn scenario_2_rejected_transition_leaves_history_untouched() {
    let engine = engine();
    for to in ["pendente", "concluido"] {
        engine
            .transition_state(EntityType::Agenda, 7, to, None, None)
            .await
            .unwrap();
    }

    let err = engine
        .transition_state(EntityType::Agenda, 7, "pendente", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransitionNotAllowed);
    assert!(err.to_string().contains("concluido -> pendente"));

    let history = engine
        .get_state_history(EntityType::Agenda, 7, 50)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        state_of(&engine, EntityType::Agenda, 7).await.as_deref(),
        Some("concluido")
    );
}

#[tokio::test]
async fn scenario_3_forced_transition_is_flagged_in_history() {
    let engine = engine();
    for to in ["pendente", "concluido"] {
        engine
            .transition_state(EntityType::Agenda, 7, to, None, None)
            .await
            .unwrap();
    }

    let outcome = engine
        .force_transition(EntityType::Agenda, 7, "pendente", "manual correction", 3)
        .await
        .unwrap();
    assert!(outcome.forced);
    assert_eq!(outcome.from_state.as_deref(), Some("concluido"));

    let history = engine
        .get_state_history(EntityType::Agenda, 7, 50)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    let newest = &history[0];
    assert!(newest.forced);
    assert_eq!(newest.reason.as_deref(), Some("manual correction"));
    assert_eq!(newest.acting_user_id, Some(3));
    assert!(history[1..].iter().all(|e| !e.forced));

    let oldest_first: Vec<_> = history.iter().rev().collect();
    assert!(verify_walk(oldest_first).is_ok());
}

#[tokio::test]
async fn scenario_4_same_state_name_different_tables() {
    let engine = engine();
    assert!(engine.is_valid_transition(EntityType::Financial, "pendente", "pago"));
    assert!(!engine.is_valid_transition(EntityType::Agenda, "pendente", "pago"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scenario_5_concurrent_writers_one_wins() {
    let memory = InMemoryStorage::new();
    let seeder = StateEngine::builtin(Arc::new(memory.clone()));
    seeder
        .transition_state(EntityType::Document, 9, "draft", None, None)
        .await
        .unwrap();

    let gated = StateEngine::builtin(Arc::new(Wrapped::gated(memory.clone(), 2)));
    let handles: Vec<_> = (0..2)
        .map(|user| {
            let engine = gated.clone();
            tokio::spawn(async move {
                engine
                    .transition_state(EntityType::Document, 9, "review", None, Some(user))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.from_state.as_deref(), Some("draft"));
                wins += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::ConcurrentModification, "{err}");
                assert!(err.is_retryable());
                conflicts += 1;
            }
        }
    }
    assert_eq!((wins, conflicts), (1, 1));

    assert_eq!(
        state_of(&seeder, EntityType::Document, 9).await.as_deref(),
        Some("review")
    );
    let history = seeder
        .get_state_history(EntityType::Document, 9, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2, "one initial entry plus exactly one new one");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_first_transitions_one_wins() {
    let memory = InMemoryStorage::new();
    let observer = StateEngine::builtin(Arc::new(memory.clone()));
    let gated = StateEngine::builtin(Arc::new(Wrapped::gated(memory, 2)));

    let handles: Vec<_> = (0..2)
        .map(|user| {
            let engine = gated.clone();
            tokio::spawn(async move {
                engine
                    .transition_state(EntityType::Document, 21, "draft", None, Some(user))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.from_state, None);
                assert_eq!(outcome.version, 0);
                wins += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::ConcurrentModification, "{err}");
                conflicts += 1;
            }
        }
    }
    assert_eq!((wins, conflicts), (1, 1));

    let history = observer
        .get_state_history(EntityType::Document, 21, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_state, None);
}

// ── Properties ──────────────────────────────────────────────────────────────

#[test]
fn p1_builtin_tables_are_closed() {
    let tables = TransitionTables::builtin();
    assert!(tables.validate().is_ok());
    for (_, def) in tables.iter() {
        for (_, to) in def.edges() {
            assert!(def.has_state(to));
        }
    }
}

#[tokio::test]
async fn p2_validation_ignores_persisted_history() {
    let engine = engine();
    let before = engine.is_valid_transition(EntityType::Process, "suspenso", "ativo");
    engine
        .transition_state(EntityType::Process, 1, "ativo", None, None)
        .await
        .unwrap();
    engine
        .transition_state(EntityType::Process, 1, "arquivado", None, None)
        .await
        .unwrap();
    assert_eq!(
        engine.is_valid_transition(EntityType::Process, "suspenso", "ativo"),
        before
    );
    assert_eq!(engine.storage().transition_count(), 2);
}

#[tokio::test]
async fn p3_write_succeeds_iff_edge_exists() {
    let engine = engine();
    let def = EntityType::Document.default_definition();
    engine
        .transition_state(EntityType::Document, 1, "draft", None, None)
        .await
        .unwrap();

    // Walk a fixed path, probing every declared target at each step.
    for next in ["review", "rejected", "draft", "review", "approved", "signed", "archived"] {
        let current = state_of(&engine, EntityType::Document, 1).await.unwrap();
        for probe in def.states().filter(|s| *s != next) {
            let valid = engine.is_valid_transition(EntityType::Document, &current, probe);
            if valid {
                continue;
            }
            let result = engine
                .transition_state(EntityType::Document, 1, probe, None, None)
                .await;
            assert!(result.is_err(), "{current} -> {probe} should be rejected");
            assert_eq!(
                state_of(&engine, EntityType::Document, 1).await.as_deref(),
                Some(current.as_str())
            );
        }
        assert!(engine.is_valid_transition(EntityType::Document, &current, next));
        engine
            .transition_state(EntityType::Document, 1, next, None, None)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn p4_history_matches_call_sequence_newest_first() {
    let engine = engine();
    let path = ["new", "contacted", "qualified", "converted"];
    for to in path {
        engine
            .transition_state(EntityType::Pipeline, 5, to, Some("step"), Some(1))
            .await
            .unwrap();
    }

    let history = engine
        .get_state_history(EntityType::Pipeline, 5, 100)
        .await
        .unwrap();
    assert_eq!(history.len(), path.len());
    let to_states: Vec<&str> = history.iter().rev().map(|e| e.to_state.as_str()).collect();
    assert_eq!(to_states, path);
    assert_eq!(history.last().unwrap().from_state, None);
    for pair in history.windows(2) {
        assert_eq!(pair[0].from_state.as_deref(), Some(pair[1].to_state.as_str()));
        assert!(pair[0].id > pair[1].id);
    }

    let capped = engine
        .get_state_history(EntityType::Pipeline, 5, 2)
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].to_state, "converted");
}

#[tokio::test]
async fn p5_force_requires_reason_before_any_write() {
    let engine = engine();
    engine
        .transition_state(EntityType::Financial, 2, "pendente", None, None)
        .await
        .unwrap();
    engine
        .transition_state(EntityType::Financial, 2, "pago", None, None)
        .await
        .unwrap();

    for blank in ["", "   "] {
        let err = engine
            .force_transition(EntityType::Financial, 2, "pendente", blank, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::EmptyReason)
        ));
    }
    assert_eq!(engine.storage().transition_count(), 2);

    assert!(!engine.is_valid_transition(EntityType::Financial, "pago", "pendente"));
    let outcome = engine
        .force_transition(EntityType::Financial, 2, "pendente", "refund issued", 1)
        .await
        .unwrap();
    assert!(outcome.forced && outcome.entry.forced);
    assert_eq!(
        state_of(&engine, EntityType::Financial, 2).await.as_deref(),
        Some("pendente")
    );
}

#[tokio::test]
async fn p5_force_rejects_undeclared_state() {
    let engine = engine();
    let err = engine
        .force_transition(EntityType::Agenda, 1, "cancelado", "cleanup", 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownState { .. })
    ));
    assert_eq!(engine.storage().transition_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn p6_racing_writers_never_both_win() {
    let engine = engine();
    engine
        .transition_state(EntityType::Document, 9, "draft", None, None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .transition_state(EntityType::Document, 9, "review", None, None)
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            // A writer that read after the winner committed sees `review`,
            // from which `review` is not an edge.
            Err(err) => assert!(
                matches!(
                    err.kind(),
                    ErrorKind::ConcurrentModification | ErrorKind::TransitionNotAllowed
                ),
                "{err}"
            ),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(engine.storage().transition_count(), 2);
}

#[tokio::test]
async fn p7_edges_do_not_leak_between_types() {
    let engine = engine();
    engine
        .transition_state(EntityType::Financial, 1, "pendente", None, None)
        .await
        .unwrap();
    engine
        .transition_state(EntityType::Agenda, 1, "pendente", None, None)
        .await
        .unwrap();

    engine
        .transition_state(EntityType::Financial, 1, "pago", None, None)
        .await
        .unwrap();
    let err = engine
        .transition_state(EntityType::Agenda, 1, "pago", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransitionNotAllowed);
    assert_eq!(
        state_of(&engine, EntityType::Agenda, 1).await.as_deref(),
        Some("pendente")
    );
}

// ── Failure paths ───────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_log_append_rolls_back_state_write() {
    let memory = InMemoryStorage::new();
    let engine = StateEngine::builtin(Arc::new(Wrapped::failing_append(memory.clone())));

    let err = engine
        .transition_state(EntityType::Agenda, 7, "pendente", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);
    assert_eq!(
        engine
            .storage()
            .appends_attempted
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // The row insert happened in the aborted snapshot and must not be visible.
    assert!(memory.get_current_state("agenda", 7).await.unwrap().is_none());
    assert_eq!(memory.transition_count(), 0);

    // The row lock was released: a healthy engine can proceed.
    let healthy = StateEngine::builtin(Arc::new(memory.clone()));
    healthy
        .transition_state(EntityType::Agenda, 7, "pendente", None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn unavailable_storage_is_infrastructure_failure() {
    let engine = StateEngine::builtin(Arc::new(InMemoryStorage::unavailable()));

    let err = engine
        .transition_state(EntityType::Agenda, 1, "pendente", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);
    assert!(!err.is_retryable());

    let err = engine
        .get_current_state(EntityType::Agenda, 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);

    let err = engine.list_transitions(None, 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InfrastructureUnavailable);
}

#[tokio::test]
async fn history_limit_must_be_in_range() {
    let engine = engine();
    for limit in [0, 1001] {
        let err = engine
            .get_state_history(EntityType::Agenda, 1, limit)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidLimit { max: 1000, .. })
        ));
    }
    assert!(engine
        .get_state_history(EntityType::Agenda, 1, 1000)
        .await
        .unwrap()
        .is_empty());
}

// ── Configuration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fixture_tables_replace_builtin_ones() {
    let def = StateDefinition::new(
        ["open"],
        vec![
            ("open".to_string(), vec!["closed".to_string()]),
            ("closed".to_string(), vec![]),
        ],
    )
    .unwrap();
    let config = EngineConfig::with_tables(TransitionTables::empty().with(EntityType::Insight, def));
    let engine = StateEngine::new(config, Arc::new(InMemoryStorage::new()));

    engine
        .transition_state(EntityType::Insight, 1, "open", None, None)
        .await
        .unwrap();
    let err = engine
        .transition_state(EntityType::Insight, 2, "novo", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransitionNotAllowed);

    let err = engine
        .transition_state(EntityType::Agenda, 1, "pendente", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::NoTable(EntityType::Agenda))
    ));
}

#[tokio::test]
async fn engine_loads_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.json");
    std::fs::write(
        &path,
        r#"{
            "max_history_limit": 5,
            "tables": {
                "agenda": {
                    "initial": ["pendente"],
                    "transitions": { "pendente": ["concluido"], "concluido": [] }
                }
            }
        }"#,
    )
    .unwrap();

    let engine = StateEngine::new(
        EngineConfig::from_path(&path).unwrap(),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(engine.is_valid_initial(EntityType::Agenda, "pendente"));
    let err = engine
        .get_state_history(EntityType::Agenda, 1, 6)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidLimit { limit: 6, max: 5 })
    ));
}

#[tokio::test]
async fn empty_reason_is_stored_as_absent() {
    let engine = engine();
    let outcome = engine
        .transition_state(EntityType::Insight, 3, "novo", Some(""), Some(8))
        .await
        .unwrap();
    assert_eq!(outcome.entry.reason, None);
    assert_eq!(outcome.entry.acting_user_id, Some(8));
}

#[tokio::test]
async fn list_current_states_newest_first_with_table_derived_next_states() {
    let engine = engine();
    engine
        .transition_state(EntityType::Client, 1, "pending", None, None)
        .await
        .unwrap();
    engine
        .transition_state(EntityType::Client, 2, "active", None, None)
        .await
        .unwrap();
    engine
        .transition_state(EntityType::Client, 1, "active", None, None)
        .await
        .unwrap();

    let states = engine
        .list_current_states(Some(EntityType::Client), 10)
        .await
        .unwrap();
    let ids: Vec<i64> = states.iter().map(|s| s.entity_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(states[0].allowed_next_states, vec!["archived", "closed"]);
}

#[tokio::test]
async fn list_current_states_fills_page_past_unknown_rows() {
    let memory = InMemoryStorage::new();
    let engine = StateEngine::builtin(Arc::new(memory.clone()));
    for id in [1, 2] {
        engine
            .transition_state(EntityType::Client, id, "pending", None, None)
            .await
            .unwrap();
    }

    let mut snapshot = memory.begin_snapshot().await.unwrap();
    memory
        .insert_current_state(&mut snapshot, "invoice", 99, "open", &[])
        .await
        .unwrap();
    memory.commit_snapshot(snapshot).await.unwrap();

    let states = engine.list_current_states(None, 2).await.unwrap();
    let ids: Vec<i64> = states.iter().map(|s| s.entity_id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert!(states.iter().all(|s| s.entity_type == EntityType::Client));
}
