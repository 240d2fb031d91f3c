//! Implementation of the `depstrap sources` command.

use anyhow::{Context, Result};
use serde_json::json;

use depstrap_lib::config::ProjectConfig;
use depstrap_lib::orchestrate::sources_for;

use crate::output::{OutputFormat, print_json};

/// Execute the sources command.
///
/// Prints one compilation unit per line, in build order, followed by a
/// `link:` line for every handle an enabled optional module adds.
pub fn cmd_sources(config: &ProjectConfig, target: &str, output: OutputFormat) -> Result<()> {
  let set = sources_for(config, target).with_context(|| format!("Cannot list sources of `{target}`"))?;

  if output.is_json() {
    return print_json(&json!({
      "target": target,
      "platform": config.features.platform,
      "sources": set.sources,
      "extra_links": set.extra_links,
    }));
  }

  for source in &set.sources {
    println!("{}", source.display());
  }
  for link in &set.extra_links {
    println!("link: {link}");
  }

  Ok(())
}
