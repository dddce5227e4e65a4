//! The state engine: guarded lifecycle transitions with an audit trail.
//!
//! Every write runs inside one storage snapshot:
//! 1. Read the current row (with lock, where the backend supports it)
//! 2. Check the move against the entity type's table (skipped when forced)
//! 3. Insert the row (first transition) or compare-and-swap it on `version`
//! 4. Append the log entry
//!
//! Any failure aborts the snapshot, so a state change is never visible
//! without its log entry or vice versa.

use std::sync::Arc;

use serde::Serialize;
use statekeeper_storage::{
    CurrentStateRecord, NewTransitionLog, StateStorage, TransitionLogRecord, TransitionQuery,
};

use crate::config::EngineConfig;
use crate::entity::EntityType;
use crate::error::{EngineError, ErrorKind, ValidationError};
use crate::table::{StateDefinition, TransitionTables};

/// One persisted audit log entry.
pub type TransitionLogEntry = TransitionLogRecord;

/// An entity's current lifecycle state as seen through its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentState {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub current_state: String,
    /// Derived from the table at read time, not taken from storage.
    pub allowed_next_states: Vec<String>,
    pub version: i64,
    pub updated_at: String,
}

/// Result of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    /// Row version after the write.
    pub version: i64,
    pub forced: bool,
    pub entry: TransitionLogEntry,
}

struct WriteRequest<'a> {
    entity_type: EntityType,
    entity_id: i64,
    to_state: &'a str,
    reason: Option<String>,
    acting_user_id: Option<i64>,
    forced: bool,
}

/// Enforces per-entity-type transition tables over a `StateStorage` backend.
///
/// Holds no mutable state; all durable state lives in the backend.
pub struct StateEngine<S: StateStorage> {
    config: EngineConfig,
    storage: Arc<S>,
}

impl<S: StateStorage> Clone for StateEngine<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StateStorage> StateEngine<S> {
    pub fn new(config: EngineConfig, storage: Arc<S>) -> Self {
        Self { config, storage }
    }

    /// An engine over the built-in tables.
    pub fn builtin(storage: Arc<S>) -> Self {
        Self::new(EngineConfig::builtin(), storage)
    }

    pub fn tables(&self) -> &TransitionTables {
        &self.config.tables
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // ── Pure table lookups ───────────────────────────────────────────────────

    /// True iff `to_state` is directly reachable from `from_state` in the
    /// table of `entity_type`. An unknown `from_state` or a missing table
    /// gives false. No I/O.
    pub fn is_valid_transition(
        &self,
        entity_type: EntityType,
        from_state: &str,
        to_state: &str,
    ) -> bool {
        self.config
            .tables
            .allows(entity_type, Some(from_state), to_state)
    }

    /// True iff `to_state` may be the first state of a new entity.
    pub fn is_valid_initial(&self, entity_type: EntityType, to_state: &str) -> bool {
        self.config.tables.allows(entity_type, None, to_state)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// `Ok(None)` means the entity has never transitioned.
    pub async fn get_current_state(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Option<CurrentState>, EngineError> {
        let record = self
            .storage
            .get_current_state(entity_type.as_str(), entity_id)
            .await
            .map_err(|e| self.read_failure(e, entity_type, entity_id))?;
        Ok(record.map(|r| self.view(entity_type, r)))
    }

    /// Transitions of one entity, newest first, at most `limit`.
    pub async fn get_state_history(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        limit: usize,
    ) -> Result<Vec<TransitionLogEntry>, EngineError> {
        self.check_limit(limit)?;
        self.storage
            .list_transitions(&TransitionQuery::entity(
                entity_type.as_str(),
                entity_id,
                limit,
            ))
            .await
            .map_err(|e| self.read_failure(e, entity_type, entity_id))
    }

    /// The global log, newest first, optionally restricted to one type.
    pub async fn list_transitions(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<TransitionLogEntry>, EngineError> {
        self.check_limit(limit)?;
        let query = TransitionQuery::recent(entity_type.map(EntityType::as_str), limit);
        self.storage.list_transitions(&query).await.map_err(|e| {
            tracing::error!(error = %e, "failed to list transitions");
            EngineError::InfrastructureUnavailable(e)
        })
    }

    /// Current rows, most recently updated first.
    ///
    /// Rows whose entity type this engine does not know are skipped. If
    /// skipping leaves the first page short, the listing is re-read without
    /// a storage limit so the page still holds up to `limit` known rows.
    pub async fn list_current_states(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<CurrentState>, EngineError> {
        self.check_limit(limit)?;
        let tag = entity_type.map(EntityType::as_str);
        let mut records = self.fetch_current_states(tag, limit).await?;
        let full_page = records.len() == limit;
        let mut states = self.known_states(records);
        if full_page && states.len() < limit {
            records = self.fetch_current_states(tag, 0).await?;
            states = self.known_states(records);
        }
        states.truncate(limit);
        Ok(states)
    }

    async fn fetch_current_states(
        &self,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CurrentStateRecord>, EngineError> {
        self.storage
            .list_current_states(entity_type, limit)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to list current states");
                EngineError::InfrastructureUnavailable(e)
            })
    }

    fn known_states(&self, records: Vec<CurrentStateRecord>) -> Vec<CurrentState> {
        records
            .into_iter()
            .filter_map(|r| match r.entity_type.parse::<EntityType>() {
                Ok(ty) => Some(self.view(ty, r)),
                Err(_) => {
                    tracing::warn!(
                        entity_type = %r.entity_type,
                        entity_id = r.entity_id,
                        "skipping row with unknown entity type"
                    );
                    None
                }
            })
            .collect()
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Move an entity to `to_state` if its table allows it.
    ///
    /// An entity without a row may only enter one of the table's initial
    /// states. An empty `reason` is stored as absent.
    pub async fn transition_state(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        to_state: &str,
        reason: Option<&str>,
        acting_user_id: Option<i64>,
    ) -> Result<TransitionOutcome, EngineError> {
        self.definition(entity_type)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        self.write(WriteRequest {
            entity_type,
            entity_id,
            to_state,
            reason,
            acting_user_id,
            forced: false,
        })
        .await
    }

    /// Move an entity to `to_state` regardless of the table's edges.
    ///
    /// `to_state` must still be declared for the entity type and `reason` must
    /// be non-blank; both are checked before storage is touched. Authorization
    /// is the caller's concern.
    pub async fn force_transition(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        to_state: &str,
        reason: &str,
        acting_user_id: i64,
    ) -> Result<TransitionOutcome, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }
        let definition = self.definition(entity_type)?;
        if !definition.has_state(to_state) {
            return Err(ValidationError::UnknownState {
                entity_type,
                state: to_state.to_string(),
            }
            .into());
        }

        self.write(WriteRequest {
            entity_type,
            entity_id,
            to_state,
            reason: Some(reason.to_string()),
            acting_user_id: Some(acting_user_id),
            forced: true,
        })
        .await
    }

    async fn write(&self, req: WriteRequest<'_>) -> Result<TransitionOutcome, EngineError> {
        let result = self.write_in_snapshot(&req).await;
        match &result {
            Ok(outcome) if outcome.forced => tracing::warn!(
                entity_type = %req.entity_type,
                entity_id = req.entity_id,
                from = ?outcome.from_state,
                to = %outcome.to_state,
                actor = ?req.acting_user_id,
                version = outcome.version,
                reason = ?req.reason,
                "forced transition applied"
            ),
            Ok(outcome) => tracing::info!(
                entity_type = %req.entity_type,
                entity_id = req.entity_id,
                from = ?outcome.from_state,
                to = %outcome.to_state,
                actor = ?req.acting_user_id,
                version = outcome.version,
                "transition applied"
            ),
            Err(err) => log_failure(err, &req),
        }
        result
    }

    async fn write_in_snapshot(
        &self,
        req: &WriteRequest<'_>,
    ) -> Result<TransitionOutcome, EngineError> {
        let ty = req.entity_type;
        let id = req.entity_id;

        let mut snapshot = self
            .storage
            .begin_snapshot()
            .await
            .map_err(|e| EngineError::from_storage(e, ty, id))?;

        match self.apply(&mut snapshot, req).await {
            Ok(outcome) => {
                self.storage
                    .commit_snapshot(snapshot)
                    .await
                    .map_err(|e| EngineError::from_storage(e, ty, id))?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        snapshot: &mut S::Snapshot,
        req: &WriteRequest<'_>,
    ) -> Result<TransitionOutcome, EngineError> {
        let ty = req.entity_type;
        let id = req.entity_id;
        let definition = self.definition(ty)?;

        let current = self
            .storage
            .get_current_state_for_update(snapshot, ty.as_str(), id)
            .await
            .map_err(|e| EngineError::from_storage(e, ty, id))?;
        let from_state = current.as_ref().map(|r| r.current_state.clone());

        if !req.forced && !definition.allows(from_state.as_deref(), req.to_state) {
            return Err(EngineError::TransitionNotAllowed {
                entity_type: ty,
                entity_id: id,
                from_state,
                to_state: req.to_state.to_string(),
            });
        }

        let allowed_next = definition.allowed_next(req.to_state);
        let version = match &current {
            None => self
                .storage
                .insert_current_state(snapshot, ty.as_str(), id, req.to_state, &allowed_next)
                .await
                .map(|record| record.version),
            Some(row) => {
                self.storage
                    .update_current_state(
                        snapshot,
                        ty.as_str(),
                        id,
                        row.version,
                        req.to_state,
                        &allowed_next,
                    )
                    .await
            }
        }
        .map_err(|e| EngineError::from_storage(e, ty, id))?;

        let entry = self
            .storage
            .append_transition(
                snapshot,
                NewTransitionLog {
                    entity_type: ty.as_str().to_string(),
                    entity_id: id,
                    from_state: from_state.clone(),
                    to_state: req.to_state.to_string(),
                    reason: req.reason.clone(),
                    acting_user_id: req.acting_user_id,
                    forced: req.forced,
                },
            )
            .await
            .map_err(|e| EngineError::from_storage(e, ty, id))?;

        Ok(TransitionOutcome {
            entity_type: ty,
            entity_id: id,
            from_state,
            to_state: req.to_state.to_string(),
            version,
            forced: req.forced,
            entry,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn definition(&self, entity_type: EntityType) -> Result<&StateDefinition, ValidationError> {
        self.config
            .tables
            .get(entity_type)
            .ok_or(ValidationError::NoTable(entity_type))
    }

    fn check_limit(&self, limit: usize) -> Result<(), ValidationError> {
        let max = self.config.max_history_limit;
        if limit == 0 || limit > max {
            return Err(ValidationError::InvalidLimit { limit, max });
        }
        Ok(())
    }

    fn view(&self, entity_type: EntityType, record: CurrentStateRecord) -> CurrentState {
        let allowed_next_states = self
            .config
            .tables
            .get(entity_type)
            .map(|def| def.allowed_next(&record.current_state))
            .unwrap_or_default();
        CurrentState {
            entity_type,
            entity_id: record.entity_id,
            current_state: record.current_state,
            allowed_next_states,
            version: record.version,
            updated_at: record.updated_at,
        }
    }

    fn read_failure(
        &self,
        err: statekeeper_storage::StorageError,
        entity_type: EntityType,
        entity_id: i64,
    ) -> EngineError {
        tracing::error!(
            entity_type = %entity_type,
            entity_id,
            error = %err,
            "storage read failed"
        );
        EngineError::InfrastructureUnavailable(err)
    }
}

fn log_failure(err: &EngineError, req: &WriteRequest<'_>) {
    match err.kind() {
        ErrorKind::TransitionNotAllowed | ErrorKind::Validation => tracing::debug!(
            entity_type = %req.entity_type,
            entity_id = req.entity_id,
            to = %req.to_state,
            error = %err,
            "transition rejected"
        ),
        ErrorKind::ConcurrentModification => tracing::debug!(
            entity_type = %req.entity_type,
            entity_id = req.entity_id,
            to = %req.to_state,
            "transition lost a concurrent race"
        ),
        ErrorKind::InfrastructureUnavailable => tracing::error!(
            entity_type = %req.entity_type,
            entity_id = req.entity_id,
            to = %req.to_state,
            error = %err,
            "transition failed: storage unavailable"
        ),
    }
}
