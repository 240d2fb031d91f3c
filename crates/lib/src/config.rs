//! Project file loading.
//!
//! A configuration pass is driven by one explicit [`ProjectConfig`] value,
//! loaded from a TOML project file (`depstrap.toml`). Every component entry
//! point receives the parts of it that it needs; there is no global state.
//!
//! Relative paths in the project file are resolved against the directory
//! containing it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_PHASE_TIMEOUT, SYSTEM_PREFIXES};
use crate::fallback::SourceFetchSpec;
use crate::graph::{TargetKind, TargetSpec};
use crate::nested::{DescriptionFile, ExportedTarget, NestedProjectSpec};
use crate::platform::os::Os;
use crate::probe::LibrarySpec;
use crate::process::PhaseSpec;
use crate::sources::{FeatureFlags, OptionalModule};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read project file {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse project file: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid sha256 for `{name}`: expected 64 hex characters, got `{value}`")]
  InvalidHash { name: String, value: String },

  #[error("`{name}` declares no artifact variants")]
  NoVariants { name: String },

  /// A name that would not map to a single directory below its root.
  #[error("invalid {kind} name `{name}`: must be a plain directory name")]
  InvalidName { kind: &'static str, name: String },

  #[error("duplicate {kind} name `{name}`")]
  Duplicate { kind: &'static str, name: String },

  #[error("directories overlap: {} and {}", .first.display(), .second.display())]
  OverlappingDirectories { first: PathBuf, second: PathBuf },

  #[error("{} is a system directory and cannot be used as {role}", .path.display())]
  SystemDirectory { role: &'static str, path: PathBuf },

  #[error("host platform is not supported; set `features.platform` explicitly")]
  UnknownPlatform,
}

/// Directory roots owned by a project. Each component writes only below its own root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
  /// Isolated install prefixes live at `<prefix_root>/<dependency>`.
  pub prefix_root: PathBuf,
  /// Downloads, unpacked sources and phase ledgers of fallback builds.
  pub work_root: PathBuf,
  /// Nested project build trees live at `<staging_root>/<project>`.
  pub staging_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
  /// Per-phase time budget; `None` blocks until the process exits.
  pub phase_timeout: Option<Duration>,
  pub jobs: usize,
  pub shell: Option<String>,
}

impl Default for ExecutionConfig {
  fn default() -> Self {
    Self {
      phase_timeout: Some(DEFAULT_PHASE_TIMEOUT),
      jobs: num_cpus(),
      shell: None,
    }
  }
}

/// The allocator dependency: how to find it, and how to build it if it is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryConfig {
  pub spec: LibrarySpec,
  pub fetch: Option<SourceFetchSpec>,
}

/// Fully resolved project configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
  /// Directory containing the project file; relative paths are resolved against it.
  pub root: PathBuf,
  pub paths: PathsConfig,
  pub execution: ExecutionConfig,
  pub features: FeatureFlags,
  pub library: Option<LibraryConfig>,
  pub nested: Vec<NestedProjectSpec>,
  pub targets: Vec<TargetSpec>,
}

impl ProjectConfig {
  /// Load and validate a project file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let root = dunce::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());

    debug!(path = ?path, root = ?root, "loading project file");
    Self::parse(&content, &root)
  }

  /// Parse project file contents, resolving relative paths against `root`.
  pub fn parse(content: &str, root: &Path) -> Result<Self, ConfigError> {
    let raw: RawProject = toml::from_str(content)?;
    raw.resolve(root)
  }

  /// Override (or add) a feature flag, e.g. from the command line.
  pub fn set_feature(&mut self, name: &str, enabled: bool) {
    if enabled {
      self.features.enabled.insert(name.to_string());
    } else {
      self.features.enabled.remove(name);
    }
  }

  pub fn set_platform(&mut self, os: Os) {
    self.features.platform = os;
  }

  pub fn target(&self, name: &str) -> Option<&TargetSpec> {
    self.targets.iter().find(|t| t.name == name)
  }
}

// =============================================================================
// File schema
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProject {
  #[serde(default)]
  paths: RawPaths,
  #[serde(default)]
  execution: RawExecution,
  #[serde(default)]
  features: RawFeatures,
  library: Option<RawLibrary>,
  #[serde(default)]
  nested: Vec<RawNested>,
  #[serde(default, rename = "target")]
  targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPaths {
  prefix_root: PathBuf,
  work_root: PathBuf,
  staging_root: PathBuf,
}

impl Default for RawPaths {
  fn default() -> Self {
    Self {
      prefix_root: PathBuf::from(".depstrap/prefix"),
      work_root: PathBuf::from(".depstrap/work"),
      staging_root: PathBuf::from(".depstrap/staging"),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExecution {
  #[serde(default, deserialize_with = "deserialize_timeout")]
  phase_timeout: Option<Option<Duration>>,
  jobs: Option<usize>,
  shell: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFeatures {
  platform: Option<Os>,
  #[serde(flatten)]
  flags: BTreeMap<String, bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLibrary {
  name: String,
  header: PathBuf,
  variants: Vec<String>,
  #[serde(default)]
  search_paths: Vec<PathBuf>,
  fetch: Option<RawFetch>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFetch {
  url: String,
  sha256: String,
  configure: PhaseSpec,
  build: PhaseSpec,
  install: PhaseSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNested {
  name: String,
  description: DescriptionFile,
  configure: PhaseSpec,
  build: PhaseSpec,
  #[serde(default)]
  exports: Vec<ExportedTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
  name: String,
  #[serde(default)]
  kind: TargetKind,
  sources: Vec<PathBuf>,
  #[serde(default)]
  links: Vec<String>,
  #[serde(default)]
  optional: Vec<OptionalModule>,
}

/// Accepts a humantime string (`"90s"`, `"1h 30m"`) or `"none"`.
fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Option<Option<Duration>>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = String::deserialize(deserializer)?;
  if value.trim().eq_ignore_ascii_case("none") {
    return Ok(Some(None));
  }
  humantime::parse_duration(value.trim())
    .map(|d| Some(Some(d)))
    .map_err(serde::de::Error::custom)
}

impl RawProject {
  fn resolve(self, root: &Path) -> Result<ProjectConfig, ConfigError> {
    let paths = PathsConfig {
      prefix_root: absolutize(root, &self.paths.prefix_root),
      work_root: absolutize(root, &self.paths.work_root),
      staging_root: absolutize(root, &self.paths.staging_root),
    };
    validate_paths(&paths)?;

    let defaults = ExecutionConfig::default();
    let execution = ExecutionConfig {
      phase_timeout: self.execution.phase_timeout.unwrap_or(defaults.phase_timeout),
      jobs: self.execution.jobs.filter(|j| *j > 0).unwrap_or(defaults.jobs),
      shell: self.execution.shell,
    };

    let platform = match self.features.platform {
      Some(os) => os,
      None => Os::current().ok_or(ConfigError::UnknownPlatform)?,
    };
    let features = FeatureFlags {
      enabled: self
        .features
        .flags
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect(),
      platform,
    };

    let library = self
      .library
      .map(|lib| resolve_library(lib, root, &paths))
      .transpose()?;

    let mut seen = BTreeSet::new();
    let mut nested = Vec::with_capacity(self.nested.len());
    for raw in self.nested {
      validate_name("nested project", &raw.name)?;
      if !seen.insert(raw.name.clone()) {
        return Err(ConfigError::Duplicate {
          kind: "nested project",
          name: raw.name,
        });
      }
      nested.push(NestedProjectSpec {
        staging_dir: paths.staging_root.join(&raw.name),
        name: raw.name,
        description: raw.description,
        configure: raw.configure,
        build: raw.build,
        exports: raw.exports,
      });
    }

    let mut seen = BTreeSet::new();
    let mut targets = Vec::with_capacity(self.targets.len());
    for raw in self.targets {
      if !seen.insert(raw.name.clone()) {
        return Err(ConfigError::Duplicate {
          kind: "target",
          name: raw.name,
        });
      }
      targets.push(TargetSpec {
        name: raw.name,
        kind: raw.kind,
        sources: raw.sources,
        links: raw.links,
        optional: raw.optional,
      });
    }

    Ok(ProjectConfig {
      root: root.to_path_buf(),
      paths,
      execution,
      features,
      library,
      nested,
      targets,
    })
  }
}

fn resolve_library(raw: RawLibrary, root: &Path, paths: &PathsConfig) -> Result<LibraryConfig, ConfigError> {
  validate_name("library", &raw.name)?;
  if raw.variants.is_empty() {
    return Err(ConfigError::NoVariants { name: raw.name });
  }

  let mut search_paths = Vec::with_capacity(raw.search_paths.len() + 1);
  if let Some(hint) = probe_root_override(&raw.name) {
    debug!(name = %raw.name, root = ?hint, "search root override from environment");
    search_paths.push(absolutize(root, &hint));
  }
  search_paths.extend(raw.search_paths.iter().map(|p| absolutize(root, p)));

  let fetch = match raw.fetch {
    Some(fetch) => {
      if fetch.sha256.len() != 64 || !fetch.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidHash {
          name: raw.name,
          value: fetch.sha256,
        });
      }
      Some(SourceFetchSpec {
        url: fetch.url,
        sha256: fetch.sha256.to_ascii_lowercase(),
        prefix_root: paths.prefix_root.clone(),
        prefix: paths.prefix_root.join(&raw.name),
        work_dir: paths.work_root.join(&raw.name),
        configure: fetch.configure,
        build: fetch.build,
        install: fetch.install,
      })
    }
    None => None,
  };

  Ok(LibraryConfig {
    spec: LibrarySpec {
      name: raw.name,
      header: raw.header,
      variants: raw.variants,
      search_paths,
    },
    fetch,
  })
}

/// `<NAME>_ROOT` environment variable for a dependency, e.g. `JEMALLOC_ROOT`.
pub fn probe_root_env_var(name: &str) -> String {
  let upper: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect();
  format!("{upper}_ROOT")
}

fn probe_root_override(name: &str) -> Option<PathBuf> {
  std::env::var_os(probe_root_env_var(name))
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  }
}

/// Reject system directories and overlapping roots: each root is owned by exactly one component.
fn validate_paths(paths: &PathsConfig) -> Result<(), ConfigError> {
  let roles = [
    ("prefix root", &paths.prefix_root),
    ("work root", &paths.work_root),
    ("staging root", &paths.staging_root),
  ];

  for (role, path) in roles {
    if is_system_dir(path) {
      return Err(ConfigError::SystemDirectory {
        role,
        path: path.clone(),
      });
    }
  }

  for (i, (_, first)) in roles.iter().enumerate() {
    for (_, second) in roles.iter().skip(i + 1) {
      if first.starts_with(second) || second.starts_with(first) {
        return Err(ConfigError::OverlappingDirectories {
          first: (*first).clone(),
          second: (*second).clone(),
        });
      }
    }
  }

  Ok(())
}

/// Names become directories under a root, so they must be exactly one normal path component.
fn validate_name(kind: &'static str, name: &str) -> Result<(), ConfigError> {
  let plain = !name.is_empty()
    && name != "."
    && name != ".."
    && !name.contains(['/', '\\', ':'])
    && Path::new(name).components().count() == 1;
  if plain {
    Ok(())
  } else {
    Err(ConfigError::InvalidName {
      kind,
      name: name.to_string(),
    })
  }
}

pub(crate) fn is_system_dir(path: &Path) -> bool {
  SYSTEM_PREFIXES.iter().any(|p| path == Path::new(p))
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
