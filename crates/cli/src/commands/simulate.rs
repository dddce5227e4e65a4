//! Replay a script of transitions against a fresh in-memory store.
//!
//! Script format: a JSON array of steps.
//!
//! ```json
//! [
//!   { "op": "transition", "entity_type": "agenda", "entity_id": 7, "to": "pendente" },
//!   { "op": "force", "entity_type": "agenda", "entity_id": 7, "to": "pendente",
//!     "reason": "manual correction", "user_id": 3 }
//! ]
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::process;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statekeeper_engine::{
    verify_walk, EngineConfig, EngineError, EntityType, StateEngine, TransitionView,
};
use statekeeper_storage::InMemoryStorage;

use crate::{load_config, print_json, report_error, OutputFormat};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Step {
    Transition {
        entity_type: EntityType,
        entity_id: i64,
        to: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    Force {
        entity_type: EntityType,
        entity_id: i64,
        to: String,
        /// A missing reason is reported by the engine as a rejected step.
        #[serde(default)]
        reason: String,
        user_id: i64,
    },
}

impl Step {
    fn target(&self) -> (EntityType, i64, &str) {
        match self {
            Step::Transition {
                entity_type,
                entity_id,
                to,
                ..
            }
            | Step::Force {
                entity_type,
                entity_id,
                to,
                ..
            } => (*entity_type, *entity_id, to.as_str()),
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Step::Transition { .. } => "transition",
            Step::Force { .. } => "force",
        }
    }
}

#[derive(Debug, Serialize)]
struct StepOutcome {
    step: usize,
    op: &'static str,
    entity_type: EntityType,
    entity_id: i64,
    to_state: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct EntityHistory {
    entity_type: EntityType,
    entity_id: i64,
    final_state: Option<String>,
    walk_valid: bool,
    /// Oldest first.
    entries: Vec<TransitionView>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    steps: Vec<StepOutcome>,
    history: Vec<EntityHistory>,
}

pub(crate) fn cmd_simulate(
    script_path: &Path,
    tables: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = load_config(tables, output, quiet);

    let script_str = match std::fs::read_to_string(script_path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading script '{}': {}", script_path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let steps: Vec<Step> = match serde_json::from_str(&script_str) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error parsing script '{}': {}", script_path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let report = match rt.block_on(run_script(config, steps)) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("simulation failed: {}", e), output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => print_report(&report),
    }
}

/// Business rejections become step outcomes; only storage failures abort
/// the run.
async fn run_script(
    config: EngineConfig,
    steps: Vec<Step>,
) -> Result<SimulationReport, EngineError> {
    let history_limit = config.max_history_limit;
    let engine = StateEngine::new(config, Arc::new(InMemoryStorage::new()));
    let mut outcomes = Vec::with_capacity(steps.len());
    let mut touched = BTreeSet::new();

    for (i, step) in steps.iter().enumerate() {
        let (entity_type, entity_id, to) = step.target();
        touched.insert((entity_type, entity_id));

        let result = match step {
            Step::Transition {
                reason, user_id, ..
            } => {
                engine
                    .transition_state(entity_type, entity_id, to, reason.as_deref(), *user_id)
                    .await
            }
            Step::Force {
                reason, user_id, ..
            } => {
                engine
                    .force_transition(entity_type, entity_id, to, reason, *user_id)
                    .await
            }
        };

        let mut outcome = StepOutcome {
            step: i + 1,
            op: step.op(),
            entity_type,
            entity_id,
            to_state: to.to_string(),
            ok: false,
            from_state: None,
            version: None,
            error_kind: None,
            error: None,
        };
        match result {
            Ok(done) => {
                outcome.ok = true;
                outcome.from_state = done.from_state;
                outcome.version = Some(done.version);
            }
            Err(EngineError::InfrastructureUnavailable(e)) => {
                return Err(EngineError::InfrastructureUnavailable(e));
            }
            Err(e) => {
                outcome.error_kind = Some(e.kind().code());
                outcome.error = Some(e.to_string());
            }
        }
        outcomes.push(outcome);
    }

    let mut history = Vec::with_capacity(touched.len());
    for (entity_type, entity_id) in touched {
        let mut entries = engine
            .get_state_history(entity_type, entity_id, history_limit)
            .await?;
        entries.reverse();
        let walk_valid = verify_walk(&entries).is_ok();
        let final_state = engine
            .get_current_state(entity_type, entity_id)
            .await?
            .map(|s| s.current_state);
        history.push(EntityHistory {
            entity_type,
            entity_id,
            final_state,
            walk_valid,
            entries: entries.into_iter().map(TransitionView::from).collect(),
        });
    }

    Ok(SimulationReport {
        steps: outcomes,
        history,
    })
}

fn print_report(report: &SimulationReport) {
    for s in &report.steps {
        let head = format!(
            "{:>3}. {} {}/{} -> {}",
            s.step, s.op, s.entity_type, s.entity_id, s.to_state
        );
        if s.ok {
            println!(
                "{}: ok (from {}, version {})",
                head,
                s.from_state.as_deref().unwrap_or("(initial)"),
                s.version.unwrap_or_default()
            );
        } else {
            println!(
                "{}: rejected [{}] {}",
                head,
                s.error_kind.unwrap_or("ERROR"),
                s.error.as_deref().unwrap_or_default()
            );
        }
    }

    println!();
    println!("History");
    println!("=======");
    for h in &report.history {
        println!();
        println!(
            "  {}/{} (final: {}){}",
            h.entity_type,
            h.entity_id,
            h.final_state.as_deref().unwrap_or("none"),
            if h.walk_valid { "" } else { " WALK BROKEN" }
        );
        for e in &h.entries {
            let mut line = format!(
                "    #{} {} -> {}",
                e.id,
                e.from_state.as_deref().unwrap_or("(initial)"),
                e.to_state
            );
            if e.forced {
                line.push_str(" [forced]");
            }
            if let Some(reason) = &e.reason {
                line.push_str(&format!(" \"{}\"", reason));
            }
            println!("{}", line);
        }
    }
}
