/// All errors that can be returned by a StateStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction modified
    /// (or currently holds) the current-state row. The expected version was
    /// not found.
    #[error(
        "concurrent conflict on {entity_type}/{entity_id}: expected version {expected_version}"
    )]
    ConcurrentConflict {
        entity_type: String,
        entity_id: i64,
        expected_version: i64,
    },

    /// A current-state row already exists for (entity_type, entity_id).
    #[error("entity already initialized: {entity_type}/{entity_id}")]
    AlreadyInitialized { entity_type: String, entity_id: i64 },

    /// An update was issued for a row that does not exist.
    #[error("entity not found: {entity_type}/{entity_id}")]
    EntityNotFound { entity_type: String, entity_id: i64 },

    /// The snapshot was already committed or aborted.
    #[error("snapshot already closed")]
    SnapshotClosed,

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// True for the two outcomes a writer gets when it loses a race on a row.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentConflict { .. } | StorageError::AlreadyInitialized { .. }
        )
    }
}
