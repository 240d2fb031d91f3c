mod clean;
mod configure;
mod link_directives;
mod probe;
mod sources;

use std::path::Path;

use anyhow::{Context, Result};

use depstrap_lib::config::ProjectConfig;

pub use clean::cmd_clean;
pub use configure::cmd_configure;
pub use link_directives::cmd_link_directives;
pub use probe::cmd_probe;
pub use sources::cmd_sources;

/// Load the project file every subcommand works from.
pub fn load_project(path: &Path) -> Result<ProjectConfig> {
  ProjectConfig::load(path).with_context(|| format!("Failed to load project file {}", path.display()))
}
