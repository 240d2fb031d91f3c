//! Implementation of the `depstrap link-directives` command.
//!
//! Resolves the library exactly like `configure` does and prints the
//! `cargo:` directives a build script needs to link it, one per line.

use anyhow::{Context, Result, anyhow};

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::orchestrate::resolve_interface;
use depstrap_lib::process::ShellRunner;

/// Execute the link-directives command.
pub fn cmd_link_directives(config: &ProjectConfig, variant: Option<&str>) -> Result<()> {
  let library = config
    .library
    .as_ref()
    .ok_or_else(|| anyhow!("Project declares no library to link"))?;
  let runner = ShellRunner::new(config.execution.shell.clone());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let interface = rt
    .block_on(resolve_interface(config, library, &runner))
    .context("Library resolution failed")?;

  let directives = interface.cargo_directives(variant).ok_or_else(|| {
    anyhow!(
      "Variant `{}` is not declared for `{}`",
      variant.unwrap_or_default(),
      interface.name
    )
  })?;

  for directive in directives {
    println!("{directive}");
  }

  Ok(())
}
