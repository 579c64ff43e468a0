//! `loadplan validate` command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use loadplan::loadtest::plan::TestPlan;
use loadplan::loadtest::scheduler::iterations;

/// Parse and validate a plan, then print its shape.
pub fn execute_validate(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Plan file not found: {}", path.display());
    }

    let plan = TestPlan::load(path)
        .with_context(|| format!("Plan '{}' is invalid", path.display()))?;

    println!("{}", describe_plan(&plan));
    eprintln!("Plan is valid.");
    Ok(())
}

fn describe_plan(plan: &TestPlan) -> String {
    let mut lines = vec![format!(
        "{} ({} thread groups, {} threads{})",
        plan.name,
        plan.thread_groups.len(),
        plan.total_threads(),
        if plan.serialize_thread_groups {
            ", serialized"
        } else {
            ""
        }
    )];
    for group in &plan.thread_groups {
        let loops = match iterations(&group.controller) {
            Some(n) => format!("{n} iterations"),
            None => "until stopped".to_string(),
        };
        lines.push(format!(
            "  {}: {} threads, ramp-up {}s, {}",
            group.name, group.threads, group.ramp_up_secs, loops
        ));
        for step in &group.controller.steps {
            lines.push(format!(
                "    {} {} {}://{}{}",
                step.name(),
                step.sampler.method,
                step.sampler.scheme,
                step.sampler.host,
                step.sampler.path
            ));
        }
    }
    lines.join("\n")
}
