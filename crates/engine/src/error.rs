use std::fmt;

use serde::Serialize;
use statekeeper_storage::StorageError;

use crate::entity::EntityType;

/// Malformed input, rejected before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("no transition table configured for entity type '{0}'")]
    NoTable(EntityType),

    #[error("a forced transition requires a non-empty reason")]
    EmptyReason,

    #[error("state '{state}' is not declared for entity type '{entity_type}'")]
    UnknownState {
        entity_type: EntityType,
        state: String,
    },

    #[error("limit {limit} out of range (1..={max})")]
    InvalidLimit { limit: usize, max: usize },
}

/// Everything a `StateEngine` operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested move is not an edge of the entity type's table.
    #[error("transition not allowed for {entity_type}/{entity_id}: {} -> {to_state}", from_label(.from_state))]
    TransitionNotAllowed {
        entity_type: EntityType,
        entity_id: i64,
        from_state: Option<String>,
        to_state: String,
    },

    /// Another writer changed the entity between our read and our write.
    #[error("concurrent modification of {entity_type}/{entity_id}; re-read and retry")]
    ConcurrentModification {
        entity_type: EntityType,
        entity_id: i64,
    },

    #[error("storage unavailable: {0}")]
    InfrastructureUnavailable(#[source] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

fn from_label(from: &Option<String>) -> &str {
    from.as_deref().unwrap_or("(initial)")
}

/// Stable, caller-facing classification of an `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    TransitionNotAllowed,
    ConcurrentModification,
    InfrastructureUnavailable,
    Validation,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::TransitionNotAllowed => "TRANSITION_NOT_ALLOWED",
            ErrorKind::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorKind::InfrastructureUnavailable => "INFRASTRUCTURE_UNAVAILABLE",
            ErrorKind::Validation => "VALIDATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TransitionNotAllowed { .. } => ErrorKind::TransitionNotAllowed,
            EngineError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            EngineError::InfrastructureUnavailable(_) => ErrorKind::InfrastructureUnavailable,
            EngineError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Only a lost race is worth retrying after re-reading; the engine never
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }

    /// Map a storage failure observed while writing `entity_type/entity_id`.
    pub(crate) fn from_storage(
        err: StorageError,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Self {
        if err.is_conflict() {
            EngineError::ConcurrentModification {
                entity_type,
                entity_id,
            }
        } else {
            EngineError::InfrastructureUnavailable(err)
        }
    }
}
