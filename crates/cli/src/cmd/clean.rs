//! Implementation of the `depstrap clean` command.

use anyhow::{Context, Result};

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::orchestrate::clean;

use crate::output::{print_info, print_success};

/// Execute the clean command.
///
/// Removes the isolated prefix root, the work root and the nested staging
/// root. Installed copies found by the probe are never touched.
pub fn cmd_clean(config: &ProjectConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let removed = rt.block_on(clean(config)).context("Clean failed")?;

  if removed.is_empty() {
    print_info("Nothing to clean");
    return Ok(());
  }

  for path in &removed {
    print_success(&format!("Removed {}", path.display()));
  }

  Ok(())
}
