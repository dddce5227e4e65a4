//! Engine configuration: the transition tables plus query limits.
//!
//! JSON shape:
//!
//! ```json
//! {
//!   "max_history_limit": 1000,
//!   "tables": {
//!     "agenda": {
//!       "initial": ["pendente"],
//!       "transitions": { "pendente": ["concluido"], "concluido": [] }
//!     }
//!   }
//! }
//! ```
//!
//! Entity types absent from `tables` get no table at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::entity::EntityType;
use crate::table::{DefinitionError, StateDefinition, TransitionTables};

pub const DEFAULT_MAX_HISTORY_LIMIT: usize = 1000;

/// Errors loading or validating a table configuration.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("table for '{entity_type}' is invalid: {source}")]
    Definition {
        entity_type: EntityType,
        #[source]
        source: DefinitionError,
    },

    #[error("unknown entity type '{0}' in table configuration")]
    UnknownEntityType(String),

    #[error("entity type '{entity_type}' has more than one table (keys: {})", tags.join(", "))]
    DuplicateEntityType {
        entity_type: EntityType,
        tags: Vec<String>,
    },

    #[error("max_history_limit must be at least 1")]
    ZeroHistoryLimit,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_max_history_limit")]
    max_history_limit: usize,
    tables: BTreeMap<String, RawTable>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    initial: Vec<String>,
    transitions: BTreeMap<String, Vec<String>>,
}

fn default_max_history_limit() -> usize {
    DEFAULT_MAX_HISTORY_LIMIT
}

/// Everything a `StateEngine` is constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub tables: TransitionTables,
    /// Upper bound for `get_state_history` limits.
    pub max_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EngineConfig {
    /// Built-in tables for every entity type.
    pub fn builtin() -> Self {
        Self::with_tables(TransitionTables::builtin())
    }

    pub fn with_tables(tables: TransitionTables) -> Self {
        Self {
            tables,
            max_history_limit: DEFAULT_MAX_HISTORY_LIMIT,
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, TableError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        if raw.max_history_limit == 0 {
            return Err(TableError::ZeroHistoryLimit);
        }

        let mut tables = TransitionTables::empty();
        let mut seen: BTreeMap<EntityType, String> = BTreeMap::new();
        for (tag, table) in raw.tables {
            let entity_type: EntityType = tag
                .parse()
                .map_err(|_| TableError::UnknownEntityType(tag.clone()))?;
            if let Some(first) = seen.get(&entity_type) {
                return Err(TableError::DuplicateEntityType {
                    entity_type,
                    tags: vec![first.clone(), tag],
                });
            }
            seen.insert(entity_type, tag.clone());
            let definition = StateDefinition::new(table.initial, table.transitions)
                .map_err(|source| TableError::Definition {
                    entity_type,
                    source,
                })?;
            tables = tables.with(entity_type, definition);
        }

        Ok(Self {
            tables,
            max_history_limit: raw.max_history_limit,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let json = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

impl TransitionTables {
    /// Load only the tables of a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        EngineConfig::from_json_str(json).map(|config| config.tables)
    }
}
