//! `loadplan run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use loadplan::loadtest::engine::LoadTestEngine;
use loadplan::loadtest::plan::TestPlan;
use loadplan::loadtest::report::{write_report, LoadTestReport};
use loadplan::loadtest::settings::{default_plan_path, ResultFormat, RunSettings};
use loadplan::loadtest::summary::render_summary;

/// Arguments of `loadplan run`. Every flag can also come from a `LOADPLAN_*`
/// environment variable.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Plan file (TOML, or JSON with a .json extension)
    #[arg(long, env = "LOADPLAN_PLAN")]
    pub plan: PathBuf,

    /// Results log to create (truncated if it exists)
    #[arg(long, env = "LOADPLAN_OUTPUT")]
    pub output: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, env = "LOADPLAN_TIMEOUT", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Results log format
    #[arg(long, env = "LOADPLAN_FORMAT", value_enum, default_value_t = ResultFormat::Csv)]
    pub format: ResultFormat,

    /// Stop the run after this many seconds even if loops remain
    #[arg(long, env = "LOADPLAN_DURATION")]
    pub duration: Option<u64>,

    /// Where to persist the plan definition (default: <output>.plan.toml)
    #[arg(long, env = "LOADPLAN_SAVE_PLAN", conflicts_with = "no_save_plan")]
    pub save_plan: Option<PathBuf>,

    /// Do not persist the plan definition
    #[arg(long)]
    pub no_save_plan: bool,

    /// Also write a JSON summary report to this path
    #[arg(long, env = "LOADPLAN_REPORT")]
    pub report: Option<PathBuf>,

    /// Seconds between summariser log lines (0 disables them)
    #[arg(long, env = "LOADPLAN_SUMMARY_INTERVAL", default_value_t = 30)]
    pub summary_interval: u64,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Execute the `run` command.
///
/// Loads and validates the plan, runs it, prints the terminal summary and
/// optionally writes the JSON report. Sample failures are reported, never
/// turned into an error.
pub async fn execute_run(args: RunArgs) -> Result<()> {
    if !args.plan.exists() {
        anyhow::bail!(
            "Plan file not found: {}\nUse `loadplan init` to create one.",
            args.plan.display()
        );
    }

    eprintln!("Loading plan from: {}", args.plan.display());
    let plan = TestPlan::load(&args.plan)
        .with_context(|| format!("Failed to load plan '{}'", args.plan.display()))?;

    let settings = build_settings(&args);
    let engine = LoadTestEngine::new(plan, settings);
    let result = engine
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Load test failed: {}", e))?;

    // Set color override based on --no-color flag and TTY detection
    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    println!("{}", render_summary(&result, engine.plan()));

    eprintln!();
    eprintln!("Results written to: {}", result.output.display());
    if let Some(path) = &engine.settings().plan_out {
        eprintln!("Plan saved to: {}", path.display());
    }

    if let Some(path) = &args.report {
        let report = LoadTestReport::from_result(&result, engine.plan());
        match write_report(&report, path) {
            Ok(()) => eprintln!("Report written to: {}", path.display()),
            Err(e) => {
                // Non-fatal -- the run itself completed and its log is written
                eprintln!("Warning: Failed to write report: {}", e);
            },
        }
    }

    Ok(())
}

/// Translate CLI flags into engine settings.
fn build_settings(args: &RunArgs) -> RunSettings {
    let plan_out = if args.no_save_plan {
        None
    } else {
        Some(
            args.save_plan
                .clone()
                .unwrap_or_else(|| default_plan_path(&args.output)),
        )
    };

    RunSettings::new(args.output.clone())
        .with_format(args.format)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_summariser_interval(Some(Duration::from_secs(args.summary_interval)))
        .with_plan_out(plan_out)
        .with_duration_limit(args.duration.map(Duration::from_secs))
}
