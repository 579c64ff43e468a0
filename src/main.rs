//! loadplan: run HTTP load-test plans from the command line.
//!
//! Plans are TOML (or JSON) files describing thread groups, loop controllers
//! and request steps. `loadplan run` executes one and streams every sample
//! into a results log.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Programmatic HTTP load testing
#[derive(Parser)]
#[command(name = "loadplan")]
#[command(about = "Run HTTP load-test plans with ramp-up, extractors and assertions", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan and write a results log
    ///
    /// Loads the plan, persists its definition next to the results log,
    /// runs every thread group and prints a summary. Failed samples do not
    /// change the exit code; an invalid plan or unwritable output does.
    Run(commands::run::RunArgs),

    /// Parse and validate a plan without running it
    Validate {
        /// Plan file (TOML, or JSON with a .json extension)
        #[arg(long, env = "LOADPLAN_PLAN")]
        plan: std::path::PathBuf,
    },

    /// Write a starter plan file
    Init {
        /// Where to write the plan
        #[arg(long, default_value = "loadplan.toml")]
        path: std::path::PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute_command(cli.command)
}

/// Logs go to stderr so stdout carries only the summary.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::run::execute_run(args))
        },
        Commands::Validate { plan } => commands::validate::execute_validate(&plan),
        Commands::Init { path, force } => commands::init::execute_init(&path, force),
    }
}
