//! `loadplan init` command implementation.

use anyhow::Result;
use std::path::Path;

/// Execute the `init` command.
///
/// Writes a commented starter plan to `path`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn execute_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Plan file already exists: {}\n\
             Use `--force` to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, generate_default_template())?;

    eprintln!("Created {}", path.display());
    eprintln!("Edit the file to point the samplers at your own service, then run:");
    eprintln!(
        "  loadplan run --plan {} --output results.jtl",
        path.display()
    );
    Ok(())
}

/// Starter plan: one thread group of 2 threads ramped over 1s, looping 10
/// times plus a leading run, over two GET samplers. The first sampler
/// extracts `$.title` into `foo` and asserts a 200 response code.
fn generate_default_template() -> String {
    r#"# loadplan test plan
#
# Run with:  loadplan run --plan loadplan.toml --output results.jtl

name = "Test Plan"

# Run thread groups one after another instead of concurrently.
serialize_thread_groups = false

# User-defined variables, available to every virtual user as ${name}.
[variables]
site = "octoperf.com"

[[thread_group]]
name = "First Thread Group"
threads = 2
# Thread start times are spread evenly over this many seconds.
ramp_up_secs = 1

[thread_group.controller.kind]
type = "loop"
loops = 10
# Run the step sequence once more before the counted loops.
run_first = true
# Set to loop until the run is stopped (Ctrl+C or --duration).
infinite = false

[[thread_group.controller.step]]
[thread_group.controller.step.sampler]
name = "HTTP Request One"
method = "GET"
scheme = "https"
host = "${site}"
port = 443
path = "/blog/2023/02/22/jmeter-logging/"

# Binds the first match of the JSON path to ${foo} for later steps.
[[thread_group.controller.step.post_processor]]
type = "json_extractor"
variable = "foo"
json_path = "$.title"

# Rules: equals, substring, contains (regex search), matches (whole-value regex).
[[thread_group.controller.step.post_processor]]
type = "response_assertion"
field = "response_code"
rule = "equals"
patterns = ["200"]

[[thread_group.controller.step]]
[thread_group.controller.step.sampler]
name = "HTTP Request"
method = "GET"
scheme = "https"
host = "${site}"
port = 443
path = "/blog/2023/01/16/uncommon-performance-testing/"
"#
    .to_string()
}
