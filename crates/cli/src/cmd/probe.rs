//! Implementation of the `depstrap probe` command.
//!
//! A read-only search for an installed copy of the library. A miss is
//! reported but is not an error.

use anyhow::Result;
use serde_json::json;

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::orchestrate::probe_only;
use depstrap_lib::probe::ProbeOutcome;

use crate::output::{OutputFormat, print_info, print_item, print_json, print_stat, print_success, print_warning};

/// Execute the probe command.
pub fn cmd_probe(config: &ProjectConfig, output: OutputFormat) -> Result<()> {
  let Some(outcome) = probe_only(config) else {
    if output.is_json() {
      return print_json(&json!({ "found": false, "reason": "no library declared" }));
    }
    print_info("Project declares no library");
    return Ok(());
  };

  match outcome {
    ProbeOutcome::FoundInSystem(installed) => {
      if output.is_json() {
        return print_json(&json!({
          "found": true,
          "prefix": installed.prefix,
          "include_dir": installed.include_dir,
          "artifacts": installed.artifacts,
        }));
      }
      print_success(&format!("Found installed library in {}", installed.prefix.display()));
      print_stat("Include", &installed.include_dir.display().to_string());
      for artifact in &installed.artifacts {
        print_item(&format!("{}: {}", artifact.variant, artifact.path.display()));
      }
    }
    ProbeOutcome::NotFound(reason) => {
      if output.is_json() {
        return print_json(&json!({ "found": false, "reason": reason.to_string() }));
      }
      print_warning(&format!("Library not found: {reason}"));
    }
  }

  Ok(())
}
