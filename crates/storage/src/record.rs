use serde::{Deserialize, Serialize};

/// The current lifecycle state of one entity, as stored in the backend.
///
/// One row exists per `(entity_type, entity_id)`. It is created on the
/// entity's first transition and overwritten in place afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStateRecord {
    pub entity_type: String,
    pub entity_id: i64,
    pub current_state: String,
    pub allowed_next_states: Vec<String>,
    /// Optimistic concurrency token. 0 on insert, +1 on every update.
    pub version: i64,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

/// A transition log entry to be appended. The backend assigns `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransitionLog {
    pub entity_type: String,
    pub entity_id: i64,
    /// `None` on the entity's first transition.
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: Option<String>,
    /// `None` for system-initiated transitions.
    pub acting_user_id: Option<i64>,
    /// Set for administrative overrides that bypassed the transition table.
    pub forced: bool,
}

/// A persisted, append-only transition log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogRecord {
    /// Monotonic sequence assigned by the backend; orders entries that share
    /// a `created_at` second.
    pub id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: Option<String>,
    pub acting_user_id: Option<i64>,
    pub forced: bool,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

impl TransitionLogRecord {
    pub(crate) fn from_new(id: i64, created_at: String, new: NewTransitionLog) -> Self {
        Self {
            id,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            from_state: new.from_state,
            to_state: new.to_state,
            reason: new.reason,
            acting_user_id: new.acting_user_id,
            forced: new.forced,
            created_at,
        }
    }
}

/// Filter for transition log queries. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionQuery {
    pub entity_type: Option<String>,
    /// Only meaningful together with `entity_type`.
    pub entity_id: Option<i64>,
    /// Maximum number of results (0 = no limit).
    pub limit: usize,
}

impl TransitionQuery {
    /// Every transition of one entity, newest first.
    pub fn entity(entity_type: &str, entity_id: i64, limit: usize) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id),
            limit,
        }
    }

    /// The global log, optionally restricted to one entity type.
    pub fn recent(entity_type: Option<&str>, limit: usize) -> Self {
        Self {
            entity_type: entity_type.map(str::to_string),
            entity_id: None,
            limit,
        }
    }

    pub fn matches(&self, record: &TransitionLogRecord) -> bool {
        self.entity_type
            .as_deref()
            .map_or(true, |t| record.entity_type == t)
            && self.entity_id.map_or(true, |id| record.entity_id == id)
    }
}

/// Current UTC time as an RFC 3339 string with second precision.
pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
