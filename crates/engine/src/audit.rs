//! Checks over an entity's transition log.

use serde::Serialize;

use crate::engine::TransitionLogEntry;

/// The first log entry that breaks the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error(
    "log entry {entry_id} starts from {} but the previous entry ended in {}",
    label(.actual_from),
    label(.expected_from)
)]
pub struct WalkViolation {
    pub entry_id: i64,
    pub expected_from: Option<String>,
    pub actual_from: Option<String>,
}

fn label(state: &Option<String>) -> &str {
    state.as_deref().unwrap_or("(initial)")
}

/// Verify that the organic entries of one entity, oldest first, chain
/// together: each `from_state` equals the previous `to_state`, and the first
/// entry has no `from_state`. Forced entries are not checked themselves, but
/// the walk continues from their `to_state`.
pub fn verify_walk<'a>(
    entries_oldest_first: impl IntoIterator<Item = &'a TransitionLogEntry>,
) -> Result<(), WalkViolation> {
    let mut previous: Option<&str> = None;
    for entry in entries_oldest_first {
        if !entry.forced && entry.from_state.as_deref() != previous {
            return Err(WalkViolation {
                entry_id: entry.id,
                expected_from: previous.map(str::to_string),
                actual_from: entry.from_state.clone(),
            });
        }
        previous = Some(entry.to_state.as_str());
    }
    Ok(())
}

/// Split entries into (organic, forced), preserving order.
pub fn partition_forced(
    entries: Vec<TransitionLogEntry>,
) -> (Vec<TransitionLogEntry>, Vec<TransitionLogEntry>) {
    entries.into_iter().partition(|e| !e.forced)
}
