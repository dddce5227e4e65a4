use std::path::Path;
use std::process;

use statekeeper_engine::{analyze_tables, EngineConfig, TableReport};

use crate::{print_json, report_error, OutputFormat};

static TABLES_SCHEMA_STR: &str = include_str!("../../schema/tables-schema.json");

pub(crate) fn cmd_check(file: &Path, output: OutputFormat, quiet: bool) {
    // Step 1: Read and parse the file
    let doc_str = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let doc: serde_json::Value = match serde_json::from_str(&doc_str) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    // Step 2: Structural validation against the embedded schema
    let schema: serde_json::Value = match serde_json::from_str(TABLES_SCHEMA_STR) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("internal error: failed to parse embedded tables schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("internal error: failed to compile tables schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let errors: Vec<String> = validator
        .iter_errors(&doc)
        .map(|e| format!("{}", e))
        .collect();
    if !errors.is_empty() {
        match output {
            OutputFormat::Text => {
                if !quiet {
                    eprintln!("invalid tables file");
                    for err in &errors {
                        eprintln!("  - {}", err);
                    }
                }
            }
            OutputFormat::Json => {
                let json = serde_json::json!({ "valid": false, "errors": errors });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
            }
        }
        process::exit(1);
    }

    // Step 3: Semantic validation (closure, initial states, terminal reachability)
    let config = match EngineConfig::from_json_str(&doc_str) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!("invalid tables file: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    // Step 4: Reachability report
    let report = analyze_tables(&config.tables);
    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "valid": true,
            "max_history_limit": config.max_history_limit,
            "report": report,
        })),
        OutputFormat::Text => print_report(&report),
    }
}

fn print_report(report: &TableReport) {
    println!("Transition Table Report");
    println!("=======================");
    println!();

    for (ty, table) in &report.tables {
        println!(
            "  {}: {} states, {} transitions, initial [{}]",
            ty,
            table.state_count,
            table.transition_count,
            table.initial_states.join(", ")
        );
        let terminal: Vec<&str> = table.terminal_states.iter().map(String::as_str).collect();
        println!("    terminal: {}", terminal.join(", "));
        if !table.unreachable_states.is_empty() {
            let dead: Vec<&str> = table
                .unreachable_states
                .iter()
                .map(String::as_str)
                .collect();
            println!("    warning: unreachable states: {}", dead.join(", "));
        }
    }

    if !report.missing.is_empty() {
        let missing: Vec<&str> = report.missing.iter().map(|t| t.as_str()).collect();
        println!();
        println!("  No table (transitions rejected): {}", missing.join(", "));
    }

    println!();
    if report.has_dead_states {
        println!("valid, with unreachable states");
    } else {
        println!("valid");
    }
}
