use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{CurrentStateRecord, NewTransitionLog, TransitionLogRecord, TransitionQuery};

/// The storage trait for statekeeper persistence backends.
///
/// A `StateStorage` implementation provides durable, transactional storage
/// for current-state rows and the append-only transition log.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// ## OCC Conflict Detection
///
/// `update_current_state` performs an optimistic concurrency check:
/// `UPDATE ... WHERE version = expected_version`. If zero rows are affected,
/// the method returns `Err(StorageError::ConcurrentConflict { ... })`.
/// `insert_current_state` is conditional on the row being absent and returns
/// `Err(StorageError::AlreadyInitialized { ... })` otherwise.
///
/// Writers on different `(entity_type, entity_id)` keys never conflict.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so that one storage
/// instance can be shared across async tasks.
#[async_trait]
pub trait StateStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Current state (within snapshot) ──────────────────────────────────────

    /// Read an entity's current state as seen by this snapshot.
    ///
    /// Row-locking backends use `SELECT ... FOR UPDATE`; others may rely on
    /// the version check in `update_current_state`. Returns `Ok(None)` if
    /// the entity has never transitioned.
    async fn get_current_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError>;

    /// Create the current-state row for an entity at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if the row exists or
    /// is being created by another open snapshot.
    async fn insert_current_state(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
        state: &str,
        allowed_next_states: &[String],
    ) -> Result<CurrentStateRecord, StorageError>;

    /// Apply a version-validated UPDATE to an entity's current state (OCC).
    ///
    /// Returns the new version number on success.
    async fn update_current_state(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
        expected_version: i64,
        new_state: &str,
        allowed_next_states: &[String],
    ) -> Result<i64, StorageError>;

    // ── Transition log (within snapshot) ──────────────────────────────────────

    /// Append a transition log entry.
    ///
    /// Must be called in the SAME snapshot as the state write it records:
    /// no state change without its log entry, and no log entry without its
    /// state change.
    async fn append_transition(
        &self,
        snapshot: &mut Self::Snapshot,
        entry: NewTransitionLog,
    ) -> Result<TransitionLogRecord, StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read an entity's committed current state without locking.
    async fn get_current_state(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError>;

    /// List current-state rows, most recently updated first.
    ///
    /// - `entity_type`: restrict to one entity type
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_current_states(
        &self,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CurrentStateRecord>, StorageError>;

    /// Query the committed transition log, newest first.
    async fn list_transitions(
        &self,
        query: &TransitionQuery,
    ) -> Result<Vec<TransitionLogRecord>, StorageError>;
}
