use std::collections::BTreeMap;
use std::path::Path;
use std::process;

use statekeeper_engine::{EntityType, StateDefinition};

use crate::{load_config, print_json, report_error, OutputFormat};

pub(crate) fn cmd_explain(
    entity_type: Option<&str>,
    tables: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = load_config(tables, output, quiet);

    let selected: BTreeMap<EntityType, &StateDefinition> = match entity_type {
        None => config.tables.iter().collect(),
        Some(tag) => {
            let ty: EntityType = match tag.parse() {
                Ok(t) => t,
                Err(e) => {
                    report_error(&format!("error: {}", e), output, quiet);
                    process::exit(1);
                }
            };
            match config.tables.get(ty) {
                Some(def) => BTreeMap::from([(ty, def)]),
                None => {
                    let msg = format!("error: no transition table configured for '{}'", ty);
                    report_error(&msg, output, quiet);
                    process::exit(1);
                }
            }
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&selected),
        OutputFormat::Text => {
            for (i, (ty, def)) in selected.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_table(*ty, def);
            }
        }
    }
}

fn print_table(ty: EntityType, def: &StateDefinition) {
    let initial: Vec<&str> = def.initial_states().collect();
    println!("{}", ty);
    println!("  initial: {}", initial.join(", "));
    for state in def.states() {
        let next = def.allowed_next(state);
        if def.is_terminal(state) {
            println!("  {} (terminal)", state);
        } else {
            println!("  {} -> {}", state, next.join(", "));
        }
    }
}
