//! Static analysis of transition tables.
//!
//! For each entity type, derives the set of states reachable from the
//! initial states via BFS, the dead states (declared but unreachable), and
//! the terminal states.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::entity::EntityType;
use crate::table::{StateDefinition, TransitionTables};

/// Analysis result for a single entity type's table.
#[derive(Debug, Clone, Serialize)]
pub struct TableAnalysis {
    pub entity_type: EntityType,
    pub initial_states: Vec<String>,
    pub state_count: usize,
    pub transition_count: usize,
    pub reachable_states: BTreeSet<String>,
    pub unreachable_states: BTreeSet<String>,
    pub terminal_states: BTreeSet<String>,
    pub terminal_reachable: bool,
}

/// Aggregated result across all configured tables.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    /// Keyed by entity type for deterministic output ordering.
    pub tables: BTreeMap<EntityType, TableAnalysis>,
    /// Entity types with no table configured.
    pub missing: Vec<EntityType>,
    /// Convenience flag: true if ANY table has unreachable states.
    pub has_dead_states: bool,
}

/// BFS over the transition relation from the given start states.
pub fn reachable_from<'a>(
    def: &StateDefinition,
    starts: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();

    for start in starts {
        if visited.insert(start.to_string()) {
            queue.push_back(start.to_string());
        }
    }

    while let Some(state) = queue.pop_front() {
        for next in def.allowed_next(&state) {
            if visited.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }

    visited
}

pub fn analyze_definition(entity_type: EntityType, def: &StateDefinition) -> TableAnalysis {
    let reachable = reachable_from(def, def.initial_states());
    let declared: BTreeSet<String> = def.states().map(str::to_string).collect();
    let unreachable: BTreeSet<String> = declared.difference(&reachable).cloned().collect();
    let terminal: BTreeSet<String> = def
        .states()
        .filter(|s| def.is_terminal(s))
        .map(str::to_string)
        .collect();
    let terminal_reachable = terminal.iter().any(|t| reachable.contains(t));

    TableAnalysis {
        entity_type,
        initial_states: def.initial_states().map(str::to_string).collect(),
        state_count: declared.len(),
        transition_count: def.edges().count(),
        reachable_states: reachable,
        unreachable_states: unreachable,
        terminal_states: terminal,
        terminal_reachable,
    }
}

pub fn analyze_tables(tables: &TransitionTables) -> TableReport {
    let mut analyzed = BTreeMap::new();
    let mut has_dead_states = false;

    for (ty, def) in tables.iter() {
        let result = analyze_definition(ty, def);
        if !result.unreachable_states.is_empty() {
            has_dead_states = true;
        }
        analyzed.insert(ty, result);
    }

    let missing = EntityType::ALL
        .into_iter()
        .filter(|ty| tables.get(*ty).is_none())
        .collect();

    TableReport {
        tables: analyzed,
        missing,
        has_dead_states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(initial: &[&str], edges: &[(&str, &[&str])]) -> StateDefinition {
        StateDefinition::new(
            initial.iter().copied(),
            edges
                .iter()
                .map(|(from, to)| {
                    (
                        from.to_string(),
                        to.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                    )
                }),
        )
        .unwrap()
    }

    #[test]
    fn test_all_states_reachable() {
        let d = def(
            &["draft"],
            &[("draft", &["submitted"]), ("submitted", &["approved"]), ("approved", &[])],
        );
        let result = analyze_definition(EntityType::Document, &d);
        assert_eq!(result.reachable_states.len(), 3);
        assert!(result.unreachable_states.is_empty());
        assert!(result.terminal_reachable);
        assert_eq!(result.transition_count, 2);
    }

    #[test]
    fn test_dead_state_detected() {
        let d = def(
            &["draft"],
            &[("draft", &["done"]), ("done", &[]), ("orphan", &["done"])],
        );
        let result = analyze_definition(EntityType::Document, &d);
        assert_eq!(
            result.unreachable_states,
            BTreeSet::from(["orphan".to_string()])
        );
    }

    #[test]
    fn test_multiple_initial_states_seed_bfs() {
        let d = EntityType::Client.default_definition();
        let reached = reachable_from(&d, d.initial_states());
        for s in ["pending", "active", "archived", "closed"] {
            assert!(reached.contains(s), "{s} not reached");
        }
    }

    #[test]
    fn test_report_lists_missing_types() {
        let tables = TransitionTables::empty()
            .with(EntityType::Agenda, EntityType::Agenda.default_definition());
        let report = analyze_tables(&tables);
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.missing.len(), 6);
        assert!(!report.missing.contains(&EntityType::Agenda));
        assert!(!report.has_dead_states);
    }

    #[test]
    fn test_builtin_tables_have_no_dead_states() {
        let report = analyze_tables(&TransitionTables::builtin());
        assert!(report.missing.is_empty());
        assert!(!report.has_dead_states, "{:?}", report);
        assert!(report.tables.values().all(|t| t.terminal_reachable));
    }
}
