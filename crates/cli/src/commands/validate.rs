use std::path::Path;
use std::process;
use std::sync::Arc;

use statekeeper_engine::{StateEngine, StateService};
use statekeeper_storage::InMemoryStorage;

use crate::{load_config, print_json, report_error, OutputFormat};

/// Answer whether one transition is allowed. An invalid transition is a
/// normal answer (exit 0); only bad input exits 1.
pub(crate) fn cmd_validate(
    entity_type: &str,
    from_state: Option<&str>,
    to_state: &str,
    tables: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = load_config(tables, output, quiet);
    let service = StateService::new(StateEngine::new(
        config,
        Arc::new(InMemoryStorage::new()),
    ));

    let response = match service.validate(entity_type, from_state, to_state) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Text => {
            let verdict = if response.valid { "valid" } else { "invalid" };
            println!(
                "{}: {} -> {}",
                verdict,
                response.from_state.as_deref().unwrap_or("(initial)"),
                response.to_state
            );
        }
    }
}
