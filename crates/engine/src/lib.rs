//! Guarded lifecycle transitions for statekeeper entities.
//!
//! A `StateEngine` enforces one transition table per `EntityType`, records
//! every successful transition in an append-only log, and uses optimistic
//! concurrency so that racing writers on the same entity cannot both win.

pub mod analysis;
pub mod audit;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod service;
pub mod table;

pub use analysis::{analyze_tables, TableAnalysis, TableReport};
pub use audit::{partition_forced, verify_walk, WalkViolation};
pub use config::{EngineConfig, TableError, DEFAULT_MAX_HISTORY_LIMIT};
pub use engine::{CurrentState, StateEngine, TransitionLogEntry, TransitionOutcome};
pub use entity::EntityType;
pub use error::{EngineError, ErrorKind, ValidationError};
pub use service::{
    Actor, EntityStateView, Role, ServiceError, StateService, TransitionAck, TransitionView,
    ValidateResponse,
};
pub use table::{DefinitionError, StateDefinition, TransitionTables, MAX_STATE_NAME_LEN};
