//! Implementation of the `depstrap configure` command.
//!
//! Runs one full configuration pass: resolve the library (probe, then a
//! source build on a miss), bootstrap nested projects, declare every target
//! and write the build graph.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::orchestrate::{ConfigureOptions, configure};
use depstrap_lib::process::ShellRunner;

use crate::output::{OutputFormat, display_path, format_duration, print_item, print_json, print_stat, print_success};

/// Execute the configure command.
///
/// Prints the interface target, what each nested project ran and the
/// declared targets. With `--output json` the whole report is printed instead.
pub fn cmd_configure(config: &ProjectConfig, rebuild_nested: bool, output: OutputFormat, verbose: bool) -> Result<()> {
  let start = Instant::now();
  let runner = ShellRunner::new(config.execution.shell.clone());
  let options = ConfigureOptions { rebuild_nested };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(configure(config, &runner, options))
    .context("Configuration failed")?;

  info!(path = %report.graph_path.display(), "build graph saved");

  if output.is_json() {
    return print_json(&report);
  }

  print_success(&format!("Configured in {}", format_duration(start.elapsed())));

  if let Some(interface) = &report.interface {
    print_stat("Library", &format!("{} ({})", interface.name, interface.origin));
    print_stat("Prefix", &interface.prefix.display().to_string());
    for artifact in &interface.artifacts {
      print_item(&format!("{}: {}", artifact.variant, artifact.path.display()));
    }
  }

  for nested in &report.nested {
    let ran = if nested.ran.is_empty() {
      "up to date".to_string()
    } else {
      let phases: Vec<String> = nested.ran.iter().map(|p| p.to_string()).collect();
      format!("ran {}", phases.join(", "))
    };
    print_stat("Nested", &format!("{} ({})", nested.project, ran));
    if verbose {
      for imported in &nested.imported {
        print_item(imported);
      }
    }
  }

  let targets = report.graph.targets();
  print_stat("Targets", &targets.len().to_string());
  for target in targets {
    let detail = format!(
      "{} [{}] {} source(s), links: {}",
      target.name(),
      target.kind(),
      target.sources().len(),
      if target.links().is_empty() {
        "none".to_string()
      } else {
        target.links().join(", ")
      }
    );
    print_item(&detail);
    if verbose {
      for imported in report.graph.on_demand_for(target.name()) {
        print_item(&format!("  builds on demand: {} (from {})", imported.name, imported.provider));
      }
      for source in target.sources() {
        print_item(&format!("  {}", display_path(source, &config.root)));
      }
    }
  }

  print_stat("Build graph", &display_path(&report.graph_path, &config.root));

  Ok(())
}
