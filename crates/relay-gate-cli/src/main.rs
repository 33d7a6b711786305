#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// crates/relay-gate-cli/src/main.rs
// ============================================================================
// Module: Relay Gate CLI Entry Point
// Description: Command dispatcher for the gateway process and operator tools.
// Purpose: Serve the gateway and expose config, secret, and DLQ operations.
// Dependencies: clap, relay-gate-{config,core,server,store-sqlite,workers}
// ============================================================================

//! ## Overview
//! The CLI runs the gateway (`serve`), validates configuration
//! (`check-config`), generates signing secrets (`secret generate`), and
//! performs manual DLQ dispositions (`dlq retry|abandon|delete`). Every
//! command resolves configuration the same way the server does, so operator
//! tooling and the process always agree on the effective values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use relay_gate_config::GatewayConfig;
use relay_gate_config::load_config;
use relay_gate_core::DlqId;
use relay_gate_core::SystemClock;
use relay_gate_core::Clock;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::runtime::generate_secret;
use relay_gate_server::Supervisor;
use relay_gate_store_sqlite::SqliteStateStore;
use relay_gate_store_sqlite::SqliteStoreConfig;
use relay_gate_workers::abandon_entries;
use relay_gate_workers::delete_entries;
use relay_gate_workers::retry_entries;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "relay-gate", version, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway process.
    Serve(ConfigArgs),
    /// Validate a configuration file and print the effective values.
    CheckConfig(ConfigArgs),
    /// Signing secret utilities.
    Secret {
        /// Selected secret subcommand.
        #[command(subcommand)]
        command: SecretCommand,
    },
    /// Manual dead-letter queue operations.
    Dlq {
        /// Selected DLQ subcommand.
        #[command(subcommand)]
        command: DlqCommand,
    },
}

/// Common configuration arguments.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Optional config file path (defaults to relay-gate.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Signing secret subcommands.
#[derive(Subcommand, Debug)]
enum SecretCommand {
    /// Print a freshly generated `whsec_` signing secret.
    Generate,
}

/// DLQ subcommands.
#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// Force entries due immediately, regardless of their schedule.
    Retry(DlqIdsArgs),
    /// Mark entries abandoned with optional notes.
    Abandon {
        /// Entry identifiers (up to 100).
        #[arg(required = true)]
        ids: Vec<String>,
        /// Operator notes recorded on each entry.
        #[arg(long)]
        notes: Option<String>,
        /// Configuration selection.
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Delete entries.
    Delete(DlqIdsArgs),
}

/// Entry id arguments shared by DLQ subcommands.
#[derive(Args, Debug)]
struct DlqIdsArgs {
    /// Entry identifiers (up to 100).
    #[arg(required = true)]
    ids: Vec<String>,
    /// Configuration selection.
    #[command(flatten)]
    config: ConfigArgs,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            report_error(&message);
            ExitCode::FAILURE
        }
    }
}

/// Dispatches one parsed command.
async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Serve(args) => {
            let config = load_config(args.config.as_deref()).map_err(|err| err.to_string())?;
            let supervisor = Supervisor::build(config).map_err(|err| err.to_string())?;
            supervisor.serve().await.map_err(|err| err.to_string())
        }
        Commands::CheckConfig(args) => check_config(args.config.as_deref()),
        Commands::Secret {
            command: SecretCommand::Generate,
        } => {
            print_line(&generate_secret());
            Ok(())
        }
        Commands::Dlq {
            command,
        } => run_dlq(command),
    }
}

/// Validates a config file and prints the effective, clamped values.
fn check_config(path: Option<&std::path::Path>) -> Result<(), String> {
    let config = load_config(path).map_err(|err| err.to_string())?;
    let rendered = toml::to_string_pretty(&config).map_err(|err| err.to_string())?;
    print_line("configuration is valid; effective values:");
    print_line(&rendered);
    Ok(())
}

/// Runs one manual DLQ operation against the configured store.
fn run_dlq(command: DlqCommand) -> Result<(), String> {
    match command {
        DlqCommand::Retry(args) => {
            let store = open_store(args.config.config.as_deref())?;
            let ids = parse_ids(&args.ids);
            let count = retry_entries(store.as_ref(), &ids, SystemClock.now())
                .map_err(|err| err.to_string())?;
            print_line(&format!("{count} entries scheduled for immediate retry"));
            Ok(())
        }
        DlqCommand::Abandon {
            ids,
            notes,
            config,
        } => {
            let store = open_store(config.config.as_deref())?;
            let ids = parse_ids(&ids);
            let count = abandon_entries(store.as_ref(), &ids, notes.as_deref())
                .map_err(|err| err.to_string())?;
            print_line(&format!("{count} entries abandoned"));
            Ok(())
        }
        DlqCommand::Delete(args) => {
            let store = open_store(args.config.config.as_deref())?;
            let ids = parse_ids(&args.ids);
            let count =
                delete_entries(store.as_ref(), &ids).map_err(|err| err.to_string())?;
            print_line(&format!("{count} entries deleted"));
            Ok(())
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens the state store named by the configuration.
fn open_store(path: Option<&std::path::Path>) -> Result<Box<dyn StateStore>, String> {
    let config: GatewayConfig = load_config(path).map_err(|err| err.to_string())?;
    if config.state_store.uri == ":memory:" {
        return Ok(Box::new(MemoryStateStore::new()));
    }
    let store = SqliteStateStore::new(&SqliteStoreConfig::at(config.state_store.uri))
        .map_err(|err| err.to_string())?;
    Ok(Box::new(store))
}

/// Wraps raw id arguments.
fn parse_ids(raw: &[String]) -> Vec<DlqId> {
    raw.iter().map(|id| DlqId::new(id.as_str())).collect()
}

/// Prints one line to stdout.
#[allow(clippy::print_stdout, reason = "The CLI's output channel is stdout.")]
fn print_line(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

/// Prints one error line to stderr.
#[allow(clippy::print_stderr, reason = "The CLI's error channel is stderr.")]
fn report_error(message: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "error: {message}");
}
