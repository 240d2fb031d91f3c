//! Crate-wide constants.

use std::time::Duration;

pub const APP_NAME: &str = "depstrap";

/// Default project file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "depstrap.toml";

/// Environment variable overriding the CLI's default project file.
pub const CONFIG_ENV_VAR: &str = "DEPSTRAP_CONFIG";

/// Marker written into an install prefix once every phase and byproduct check passed.
pub const COMPLETE_MARKER: &str = ".depstrap-complete";

/// Phase ledger file name, kept in a work or staging directory.
pub const PHASE_LEDGER: &str = "phase-ledger.json";

/// File name of the resolved build graph written under the work root.
pub const BUILD_GRAPH_FILE: &str = "build-graph.json";

/// Upper bound for a single external phase unless the project file says otherwise.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Prefixes that belong to the system and may never be used as an isolated install prefix.
pub const SYSTEM_PREFIXES: &[&str] = &[
  "/",
  "/usr",
  "/usr/local",
  "/opt",
  "/opt/homebrew",
  "/opt/local",
  "/bin",
  "/lib",
  "/lib64",
];
