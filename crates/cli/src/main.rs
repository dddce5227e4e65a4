mod commands;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use statekeeper_engine::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{cmd_check, cmd_explain, cmd_simulate, cmd_validate};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Lifecycle transition table tooling.
#[derive(Parser)]
#[command(name = "statekeeper", version, about = "Lifecycle transition table tooling")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log engine activity at debug level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a transition table configuration file
    Check {
        /// Path to the tables JSON file
        file: PathBuf,
    },

    /// Check whether a single transition is allowed
    Validate {
        /// Entity type (process, document, agenda, pipeline, financial, client, insight)
        #[arg(long)]
        entity_type: String,
        /// Target state
        #[arg(long)]
        to: String,
        /// Current state; omit to check an entity that has never transitioned
        #[arg(long)]
        from: Option<String>,
        /// Tables JSON file (default: built-in tables)
        #[arg(long)]
        tables: Option<PathBuf>,
    },

    /// Print transition tables
    Explain {
        /// Only this entity type
        entity_type: Option<String>,
        /// Tables JSON file (default: built-in tables)
        #[arg(long)]
        tables: Option<PathBuf>,
    },

    /// Run a script of transitions against an in-memory store
    Simulate {
        /// Path to the script JSON file
        script: PathBuf,
        /// Tables JSON file (default: built-in tables)
        #[arg(long)]
        tables: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { file } => {
            cmd_check(&file, cli.output, cli.quiet);
        }
        Commands::Validate {
            entity_type,
            to,
            from,
            tables,
        } => {
            cmd_validate(
                &entity_type,
                from.as_deref(),
                &to,
                tables.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Explain {
            entity_type,
            tables,
        } => {
            cmd_explain(
                entity_type.as_deref(),
                tables.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Simulate { script, tables } => {
            cmd_simulate(&script, tables.as_deref(), cli.output, cli.quiet);
        }
    }
}

/// Structured logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Load `--tables`, or the built-in tables when absent. Exits on error.
pub(crate) fn load_config(tables: Option<&Path>, output: OutputFormat, quiet: bool) -> EngineConfig {
    let Some(path) = tables else {
        return EngineConfig::builtin();
    };
    match EngineConfig::from_path(path) {
        Ok(config) => config,
        Err(e) => {
            let msg = format!("error loading tables '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

/// Print a serializable value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
    println!("{}", json);
}
