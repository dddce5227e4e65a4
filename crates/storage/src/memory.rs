//! In-memory `StateStorage` backend.
//!
//! Committed rows live behind a single `std::sync::Mutex`; the lock is never
//! held across an `.await`. A snapshot buffers its writes and applies them
//! all at once on commit. Writing a current-state row takes a row lock for
//! the rest of the snapshot; a second snapshot touching the same row fails
//! immediately (NOWAIT) instead of blocking. Locks are released on commit,
//! abort, or drop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    now_rfc3339, CurrentStateRecord, NewTransitionLog, TransitionLogRecord, TransitionQuery,
};
use crate::traits::StateStorage;

type RowKey = (String, i64);

#[derive(Default)]
struct Inner {
    states: HashMap<RowKey, CurrentStateRecord>,
    /// Commit sequence of the last write per row, for "recently updated" order.
    touched: HashMap<RowKey, u64>,
    log: Vec<TransitionLogRecord>,
    /// Row locks: key -> id of the snapshot holding it.
    locks: HashMap<RowKey, u64>,
    next_snapshot_id: u64,
    next_log_id: i64,
    commit_seq: u64,
}

impl Inner {
    fn release_locks(&mut self, snapshot_id: u64) {
        self.locks.retain(|_, holder| *holder != snapshot_id);
    }

    fn locked_by_other(&self, key: &RowKey, snapshot_id: u64) -> bool {
        self.locks
            .get(key)
            .is_some_and(|holder| *holder != snapshot_id)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> Result<MutexGuard<'_, Inner>, StorageError> {
    inner
        .lock()
        .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
}

/// Reference backend keeping everything in process memory.
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
    unavailable: bool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose every call fails with `StorageError::Backend`,
    /// standing in for an unreachable database.
    pub fn unavailable() -> Self {
        Self {
            inner: Arc::default(),
            unavailable: true,
        }
    }

    /// Number of committed transition log entries.
    pub fn transition_count(&self) -> usize {
        self.inner.lock().map(|i| i.log.len()).unwrap_or(0)
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        if self.unavailable {
            return Err(StorageError::Backend(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        lock_inner(&self.inner)
    }
}

/// An open in-memory transaction.
pub struct MemorySnapshot {
    id: u64,
    writes: BTreeMap<RowKey, CurrentStateRecord>,
    log: Vec<TransitionLogRecord>,
    store: Arc<Mutex<Inner>>,
    closed: bool,
}

impl MemorySnapshot {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::SnapshotClosed)
        } else {
            Ok(())
        }
    }

    fn visible(&self, inner: &Inner, key: &RowKey) -> Option<CurrentStateRecord> {
        self.writes
            .get(key)
            .or_else(|| inner.states.get(key))
            .cloned()
    }
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(mut inner) = self.store.lock() {
            inner.release_locks(self.id);
        }
    }
}

#[async_trait]
impl StateStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let mut inner = self.guard()?;
        inner.next_snapshot_id += 1;
        Ok(MemorySnapshot {
            id: inner.next_snapshot_id,
            writes: BTreeMap::new(),
            log: Vec::new(),
            store: Arc::clone(&self.inner),
            closed: false,
        })
    }

    async fn commit_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut inner = self.guard()?;
        inner.commit_seq += 1;
        let seq = inner.commit_seq;
        for (key, record) in std::mem::take(&mut snapshot.writes) {
            inner.touched.insert(key.clone(), seq);
            inner.states.insert(key, record);
        }
        let entries = std::mem::take(&mut snapshot.log);
        inner.log.extend(entries);
        inner.release_locks(snapshot.id);
        snapshot.closed = true;
        tracing::trace!(snapshot = snapshot.id, "in-memory snapshot committed");
        Ok(())
    }

    async fn abort_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        snapshot.writes.clear();
        snapshot.log.clear();
        let mut inner = lock_inner(&snapshot.store)?;
        inner.release_locks(snapshot.id);
        drop(inner);
        snapshot.closed = true;
        Ok(())
    }

    async fn get_current_state_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError> {
        snapshot.ensure_open()?;
        let inner = self.guard()?;
        let key = (entity_type.to_string(), entity_id);
        Ok(snapshot.visible(&inner, &key))
    }

    async fn insert_current_state(
        &self,
        snapshot: &mut MemorySnapshot,
        entity_type: &str,
        entity_id: i64,
        state: &str,
        allowed_next_states: &[String],
    ) -> Result<CurrentStateRecord, StorageError> {
        snapshot.ensure_open()?;
        let mut inner = self.guard()?;
        let key = (entity_type.to_string(), entity_id);

        if snapshot.visible(&inner, &key).is_some() || inner.locked_by_other(&key, snapshot.id) {
            return Err(StorageError::AlreadyInitialized {
                entity_type: entity_type.to_string(),
                entity_id,
            });
        }

        let record = CurrentStateRecord {
            entity_type: entity_type.to_string(),
            entity_id,
            current_state: state.to_string(),
            allowed_next_states: allowed_next_states.to_vec(),
            version: 0,
            updated_at: now_rfc3339(),
        };
        inner.locks.insert(key.clone(), snapshot.id);
        snapshot.writes.insert(key, record.clone());
        Ok(record)
    }

    async fn update_current_state(
        &self,
        snapshot: &mut MemorySnapshot,
        entity_type: &str,
        entity_id: i64,
        expected_version: i64,
        new_state: &str,
        allowed_next_states: &[String],
    ) -> Result<i64, StorageError> {
        snapshot.ensure_open()?;
        let mut inner = self.guard()?;
        let key = (entity_type.to_string(), entity_id);

        let current = snapshot
            .visible(&inner, &key)
            .ok_or_else(|| StorageError::EntityNotFound {
                entity_type: entity_type.to_string(),
                entity_id,
            })?;

        if inner.locked_by_other(&key, snapshot.id) || current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                entity_type: entity_type.to_string(),
                entity_id,
                expected_version,
            });
        }

        let updated = CurrentStateRecord {
            current_state: new_state.to_string(),
            allowed_next_states: allowed_next_states.to_vec(),
            version: current.version + 1,
            updated_at: now_rfc3339(),
            ..current
        };
        let version = updated.version;
        inner.locks.insert(key.clone(), snapshot.id);
        snapshot.writes.insert(key, updated);
        Ok(version)
    }

    async fn append_transition(
        &self,
        snapshot: &mut MemorySnapshot,
        entry: NewTransitionLog,
    ) -> Result<TransitionLogRecord, StorageError> {
        snapshot.ensure_open()?;
        let mut inner = self.guard()?;
        inner.next_log_id += 1;
        let record = TransitionLogRecord::from_new(inner.next_log_id, now_rfc3339(), entry);
        snapshot.log.push(record.clone());
        Ok(record)
    }

    async fn get_current_state(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError> {
        let inner = self.guard()?;
        Ok(inner
            .states
            .get(&(entity_type.to_string(), entity_id))
            .cloned())
    }

    async fn list_current_states(
        &self,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CurrentStateRecord>, StorageError> {
        let inner = self.guard()?;
        let mut rows: Vec<(u64, &CurrentStateRecord)> = inner
            .states
            .iter()
            .filter(|(key, _)| entity_type.map_or(true, |t| key.0 == t))
            .map(|(key, rec)| (inner.touched.get(key).copied().unwrap_or(0), rec))
            .collect();
        rows.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.entity_type.cmp(&b.1.entity_type))
                .then_with(|| a.1.entity_id.cmp(&b.1.entity_id))
        });
        let take = if limit == 0 { rows.len() } else { limit };
        Ok(rows.into_iter().take(take).map(|(_, r)| r.clone()).collect())
    }

    async fn list_transitions(
        &self,
        query: &TransitionQuery,
    ) -> Result<Vec<TransitionLogRecord>, StorageError> {
        let inner = self.guard()?;
        let mut entries: Vec<&TransitionLogRecord> =
            inner.log.iter().filter(|r| query.matches(r)).collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        let take = if query.limit == 0 {
            entries.len()
        } else {
            query.limit
        };
        Ok(entries.into_iter().take(take).cloned().collect())
    }
}
