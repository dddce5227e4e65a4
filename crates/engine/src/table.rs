//! Transition tables: which states exist for an entity type and which moves
//! between them are legal.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::analysis;
use crate::entity::EntityType;

/// Longest accepted state name (width of the `currentState` column).
pub const MAX_STATE_NAME_LEN: usize = 50;

/// A violation of the structural invariants of a single table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("no initial state declared")]
    NoInitialState,

    #[error("initial state '{0}' is not declared as a state")]
    UndeclaredInitial(String),

    #[error("transition target '{to}' (from '{from}') is not declared as a state")]
    DanglingTarget { from: String, to: String },

    #[error("no terminal state is reachable from the initial states")]
    NoReachableTerminal,

    #[error("invalid state name '{0}': must be 1-50 characters")]
    InvalidStateName(String),
}

/// The lifecycle graph of one entity type.
///
/// `transitions` maps every declared state to the states directly reachable
/// from it. `initial` lists the states an entity may enter on its first
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateDefinition {
    initial: BTreeSet<String>,
    transitions: BTreeMap<String, BTreeSet<String>>,
}

impl StateDefinition {
    /// Build and validate a definition.
    pub fn new(
        initial: impl IntoIterator<Item = impl Into<String>>,
        transitions: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Result<Self, DefinitionError> {
        let def = Self {
            initial: initial.into_iter().map(Into::into).collect(),
            transitions: transitions
                .into_iter()
                .map(|(from, to)| (from, to.into_iter().collect()))
                .collect(),
        };
        def.validate()?;
        Ok(def)
    }

    /// Build a definition from static edge lists without validating it.
    pub(crate) fn from_edges(initial: &[&str], edges: &[(&str, &[&str])]) -> Self {
        Self {
            initial: initial.iter().map(|s| s.to_string()).collect(),
            transitions: edges
                .iter()
                .map(|(from, to)| {
                    (
                        from.to_string(),
                        to.iter().map(|s| s.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Check closure, initial states, state names and terminal reachability.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for state in self.transitions.keys() {
            if state.is_empty() || state.chars().count() > MAX_STATE_NAME_LEN {
                return Err(DefinitionError::InvalidStateName(state.clone()));
            }
        }

        for (from, targets) in &self.transitions {
            for to in targets {
                if !self.transitions.contains_key(to) {
                    return Err(DefinitionError::DanglingTarget {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        if self.initial.is_empty() {
            return Err(DefinitionError::NoInitialState);
        }
        for state in &self.initial {
            if !self.transitions.contains_key(state) {
                return Err(DefinitionError::UndeclaredInitial(state.clone()));
            }
        }

        let reachable = analysis::reachable_from(self, self.initial.iter().map(String::as_str));
        if !reachable.iter().any(|s| self.is_terminal(s)) {
            return Err(DefinitionError::NoReachableTerminal);
        }

        Ok(())
    }

    /// Whether a move is legal. `from = None` is the initial marker of an
    /// entity that has never transitioned; only initial states are reachable
    /// from it. An undeclared `from` is never an error, just `false`.
    pub fn allows(&self, from: Option<&str>, to: &str) -> bool {
        match from {
            None => self.initial.contains(to),
            Some(from) => self
                .transitions
                .get(from)
                .is_some_and(|targets| targets.contains(to)),
        }
    }

    /// States directly reachable from `state`, sorted. Empty for terminal or
    /// undeclared states.
    pub fn allowed_next(&self, state: &str) -> Vec<String> {
        self.transitions
            .get(state)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.transitions.contains_key(state)
    }

    /// A state with no outgoing edges, or whose only edge is to itself.
    pub fn is_terminal(&self, state: &str) -> bool {
        self.transitions
            .get(state)
            .is_some_and(|targets| targets.iter().all(|t| t == state))
    }

    pub fn initial_states(&self) -> impl Iterator<Item = &str> {
        self.initial.iter().map(String::as_str)
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.transitions.keys().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.transitions
            .iter()
            .flat_map(|(from, to)| to.iter().map(move |t| (from.as_str(), t.as_str())))
    }
}

/// The set of transition tables an engine enforces, one per entity type.
///
/// An entity type with no table cannot be transitioned at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionTables {
    tables: BTreeMap<EntityType, StateDefinition>,
}

impl TransitionTables {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in tables for all seven entity types.
    pub fn builtin() -> Self {
        Self {
            tables: EntityType::ALL
                .into_iter()
                .map(|ty| (ty, ty.default_definition()))
                .collect(),
        }
    }

    /// Add or replace the table for one entity type.
    pub fn with(mut self, entity_type: EntityType, definition: StateDefinition) -> Self {
        self.tables.insert(entity_type, definition);
        self
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&StateDefinition> {
        self.tables.get(&entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &StateDefinition)> {
        self.tables.iter().map(|(ty, def)| (*ty, def))
    }

    /// Validate every table, reporting the first violation found.
    pub fn validate(&self) -> Result<(), (EntityType, DefinitionError)> {
        for (ty, def) in &self.tables {
            def.validate().map_err(|e| (*ty, e))?;
        }
        Ok(())
    }

    /// Pure table lookup; an entity type without a table allows nothing.
    pub fn allows(&self, entity_type: EntityType, from: Option<&str>, to: &str) -> bool {
        self.get(entity_type).is_some_and(|def| def.allows(from, to))
    }
}
