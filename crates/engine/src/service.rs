//! Caller-facing operations over a `StateEngine`.
//!
//! Inputs arrive as plain strings and numbers the way a request router hands
//! them over; outputs are serde views with camelCase field names.

use serde::{Deserialize, Serialize};
use statekeeper_storage::StateStorage;

use crate::engine::{CurrentState, StateEngine, TransitionLogEntry, TransitionOutcome};
use crate::entity::EntityType;
use crate::error::EngineError;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_STATES_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("user {user_id} is not allowed to {action}")]
    Forbidden { user_id: i64, action: &'static str },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<crate::error::ValidationError> for ServiceError {
    fn from(err: crate::error::ValidationError) -> Self {
        ServiceError::Engine(err.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStateView {
    pub entity_type: EntityType,
    pub entity_id: i64,
    /// `None` when the entity has never transitioned.
    pub current_state: Option<String>,
    pub allowed_next_states: Vec<String>,
    pub version: Option<i64>,
    pub updated_at: Option<String>,
}

impl EntityStateView {
    fn from_state(entity_type: EntityType, entity_id: i64, state: Option<CurrentState>) -> Self {
        match state {
            Some(s) => Self {
                entity_type,
                entity_id,
                current_state: Some(s.current_state),
                allowed_next_states: s.allowed_next_states,
                version: Some(s.version),
                updated_at: Some(s.updated_at),
            },
            None => Self {
                entity_type,
                entity_id,
                current_state: None,
                allowed_next_states: Vec::new(),
                version: None,
                updated_at: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionView {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: Option<String>,
    pub acting_user_id: Option<i64>,
    pub forced: bool,
    pub created_at: String,
}

impl From<TransitionLogEntry> for TransitionView {
    fn from(e: TransitionLogEntry) -> Self {
        Self {
            id: e.id,
            entity_type: e.entity_type,
            entity_id: e.entity_id,
            from_state: e.from_state,
            to_state: e.to_state,
            reason: e.reason,
            acting_user_id: e.acting_user_id,
            forced: e.forced,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionAck {
    pub success: bool,
    pub from_state: Option<String>,
    pub to_state: String,
    pub version: i64,
    pub forced: bool,
}

impl From<TransitionOutcome> for TransitionAck {
    fn from(o: TransitionOutcome) -> Self {
        Self {
            success: true,
            from_state: o.from_state,
            to_state: o.to_state,
            version: o.version,
            forced: o.forced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    pub from_state: Option<String>,
    pub to_state: String,
}

fn parse_type(tag: &str) -> Result<EntityType, ServiceError> {
    Ok(tag.parse::<EntityType>()?)
}

/// The router-facing surface of the engine.
pub struct StateService<S: StateStorage> {
    engine: StateEngine<S>,
}

impl<S: StateStorage> StateService<S> {
    pub fn new(engine: StateEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &StateEngine<S> {
        &self.engine
    }

    pub async fn get_entity_state(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<EntityStateView, ServiceError> {
        let ty = parse_type(entity_type)?;
        let state = self.engine.get_current_state(ty, entity_id).await?;
        Ok(EntityStateView::from_state(ty, entity_id, state))
    }

    pub async fn list_transitions(
        &self,
        entity_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TransitionView>, ServiceError> {
        let ty = entity_type.map(parse_type).transpose()?;
        let entries = self
            .engine
            .list_transitions(ty, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await?;
        Ok(entries.into_iter().map(TransitionView::from).collect())
    }

    pub async fn update_state(
        &self,
        actor: &Actor,
        entity_type: &str,
        entity_id: i64,
        to_state: &str,
        reason: Option<&str>,
    ) -> Result<TransitionAck, ServiceError> {
        let ty = parse_type(entity_type)?;
        let outcome = self
            .engine
            .transition_state(ty, entity_id, to_state, reason, Some(actor.user_id))
            .await?;
        Ok(outcome.into())
    }

    /// Administrators only; anyone else is refused before the engine runs.
    pub async fn force_transition(
        &self,
        actor: &Actor,
        entity_type: &str,
        entity_id: i64,
        to_state: &str,
        reason: &str,
    ) -> Result<TransitionAck, ServiceError> {
        if !actor.is_admin() {
            tracing::warn!(
                user_id = actor.user_id,
                entity_type,
                entity_id,
                to = to_state,
                "forced transition refused: caller is not an administrator"
            );
            return Err(ServiceError::Forbidden {
                user_id: actor.user_id,
                action: "force a transition",
            });
        }
        let ty = parse_type(entity_type)?;
        let outcome = self
            .engine
            .force_transition(ty, entity_id, to_state, reason, actor.user_id)
            .await?;
        Ok(outcome.into())
    }

    pub async fn get_history(
        &self,
        entity_type: &str,
        entity_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<TransitionView>, ServiceError> {
        let ty = parse_type(entity_type)?;
        let entries = self
            .engine
            .get_state_history(ty, entity_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?;
        Ok(entries.into_iter().map(TransitionView::from).collect())
    }

    /// Answer whether a move would be legal without performing it. Without
    /// `from_state` the initial marker is checked.
    pub fn validate(
        &self,
        entity_type: &str,
        from_state: Option<&str>,
        to_state: &str,
    ) -> Result<ValidateResponse, ServiceError> {
        let ty = parse_type(entity_type)?;
        let valid = match from_state {
            Some(from) => self.engine.is_valid_transition(ty, from, to_state),
            None => self.engine.is_valid_initial(ty, to_state),
        };
        Ok(ValidateResponse {
            valid,
            from_state: from_state.map(str::to_string),
            to_state: to_state.to_string(),
        })
    }

    pub async fn list_states(
        &self,
        entity_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<EntityStateView>, ServiceError> {
        let ty = entity_type.map(parse_type).transpose()?;
        let states = self
            .engine
            .list_current_states(ty, limit.unwrap_or(DEFAULT_STATES_LIMIT))
            .await?;
        Ok(states
            .into_iter()
            .map(|s| EntityStateView::from_state(s.entity_type, s.entity_id, Some(s)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use statekeeper_storage::InMemoryStorage;

    use super::*;
    use crate::error::{ErrorKind, ValidationError};

    fn service() -> StateService<InMemoryStorage> {
        StateService::new(StateEngine::builtin(Arc::new(InMemoryStorage::new())))
    }

    #[tokio::test]
    async fn unknown_entity_type_is_a_validation_error() {
        let svc = service();
        let err = svc.get_entity_state("invoice", 1).await.unwrap_err();
        match err {
            ServiceError::Engine(EngineError::Validation(ValidationError::UnknownEntityType(t))) => {
                assert_eq!(t, "invoice")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn never_transitioned_entity_renders_null_state() {
        let svc = service();
        let view = svc.get_entity_state("agenda", 7).await.unwrap();
        assert_eq!(view.current_state, None);
        assert!(view.allowed_next_states.is_empty());

        let json = serde_json::to_value(&view).unwrap();
        assert!(json["currentState"].is_null());
        assert_eq!(json["allowedNextStates"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn non_admin_cannot_force() {
        let svc = service();
        let err = svc
            .force_transition(&Actor::user(3), "agenda", 7, "pendente", "fix")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden { user_id: 3, .. }));
        assert_eq!(svc.engine().storage().transition_count(), 0);
    }

    #[tokio::test]
    async fn admin_force_is_recorded_with_actor() {
        let svc = service();
        let ack = svc
            .force_transition(&Actor::admin(1), "processo", 4, "arquivado", "data cleanup")
            .await
            .unwrap();
        assert!(ack.success && ack.forced);

        let history = svc.get_history("process", 4, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].acting_user_id, Some(1));
        assert_eq!(history[0].reason.as_deref(), Some("data cleanup"));
    }

    #[tokio::test]
    async fn update_state_reports_rejection_kind() {
        let svc = service();
        let err = svc
            .update_state(&Actor::user(2), "financial", 1, "pago", None)
            .await
            .unwrap_err();
        match err {
            ServiceError::Engine(e) => assert_eq!(e.kind(), ErrorKind::TransitionNotAllowed),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_checks_initial_marker_without_from() {
        let svc = service();
        assert!(svc.validate("agenda", None, "pendente").unwrap().valid);
        assert!(!svc.validate("agenda", None, "concluido").unwrap().valid);
        assert!(svc.validate("agenda", Some("pendente"), "concluido").unwrap().valid);
    }

    #[tokio::test]
    async fn list_states_uses_default_limit_and_filters() {
        let svc = service();
        let actor = Actor::user(1);
        svc.update_state(&actor, "agenda", 1, "pendente", None).await.unwrap();
        svc.update_state(&actor, "financial", 1, "pendente", None).await.unwrap();

        let all = svc.list_states(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let agenda = svc.list_states(Some("agenda"), None).await.unwrap();
        assert_eq!(agenda.len(), 1);
        assert_eq!(agenda[0].allowed_next_states, vec!["concluido"]);

        let recent = svc.list_transitions(Some("financeiro"), None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].entity_type, "financial");
    }
}
