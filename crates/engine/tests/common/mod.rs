//! Storage wrappers for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use statekeeper_storage::{
    CurrentStateRecord, NewTransitionLog, StateStorage, StorageError, TransitionLogRecord,
    TransitionQuery,
};
use tokio::sync::Barrier;

/// Which inner call a `Wrapped` storage interferes with.
pub enum Fault {
    /// Hold every locked read at a barrier until `n` readers arrived, so
    /// concurrent writers all observe the same row before any of them writes.
    GateReads(Arc<Barrier>),
    /// Fail every `append_transition` with a backend error.
    FailAppend,
}

pub struct Wrapped<S> {
    pub inner: S,
    pub fault: Fault,
    pub appends_attempted: AtomicUsize,
}

impl<S> Wrapped<S> {
    pub fn gated(inner: S, readers: usize) -> Self {
        Self::new(inner, Fault::GateReads(Arc::new(Barrier::new(readers))))
    }

    pub fn failing_append(inner: S) -> Self {
        Self::new(inner, Fault::FailAppend)
    }

    fn new(inner: S, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            appends_attempted: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: StateStorage> StateStorage for Wrapped<S> {
    type Snapshot = S::Snapshot;

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        self.inner.begin_snapshot().await
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        self.inner.commit_snapshot(snapshot).await
    }

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        self.inner.abort_snapshot(snapshot).await
    }

    async fn get_current_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError> {
        let record = self
            .inner
            .get_current_state_for_update(snapshot, entity_type, entity_id)
            .await?;
        if let Fault::GateReads(barrier) = &self.fault {
            barrier.wait().await;
        }
        Ok(record)
    }

    async fn insert_current_state(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
        state: &str,
        allowed_next_states: &[String],
    ) -> Result<CurrentStateRecord, StorageError> {
        self.inner
            .insert_current_state(snapshot, entity_type, entity_id, state, allowed_next_states)
            .await
    }

    async fn update_current_state(
        &self,
        snapshot: &mut Self::Snapshot,
        entity_type: &str,
        entity_id: i64,
        expected_version: i64,
        new_state: &str,
        allowed_next_states: &[String],
    ) -> Result<i64, StorageError> {
        self.inner
            .update_current_state(
                snapshot,
                entity_type,
                entity_id,
                expected_version,
                new_state,
                allowed_next_states,
            )
            .await
    }

    async fn append_transition(
        &self,
        snapshot: &mut Self::Snapshot,
        entry: NewTransitionLog,
    ) -> Result<TransitionLogRecord, StorageError> {
        self.appends_attempted.fetch_add(1, Ordering::SeqCst);
        if let Fault::FailAppend = self.fault {
            return Err(StorageError::Backend("injected append failure".to_string()));
        }
        self.inner.append_transition(snapshot, entry).await
    }

    async fn get_current_state(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Option<CurrentStateRecord>, StorageError> {
        self.inner.get_current_state(entity_type, entity_id).await
    }

    async fn list_current_states(
        &self,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CurrentStateRecord>, StorageError> {
        self.inner.list_current_states(entity_type, limit).await
    }

    async fn list_transitions(
        &self,
        query: &TransitionQuery,
    ) -> Result<Vec<TransitionLogRecord>, StorageError> {
        self.inner.list_transitions(query).await
    }
}
