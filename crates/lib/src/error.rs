//! Fatal error taxonomy of a configuration pass.
//!
//! Every variant stops the whole pass; nothing is retried. The `Display`
//! output is the single diagnostic shown to the user, so each message names
//! the phase and the dependency or project involved.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::placeholder::PlaceholderError;
use crate::process::Phase;
use crate::util::hash::HashError;

/// What a phase was running for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
  /// A native dependency built by the fallback builder.
  Dependency(String),
  /// A nested helper project built by the bootstrapper.
  Project(String),
}

impl std::fmt::Display for Subject {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Subject::Dependency(name) => write!(f, "dependency `{name}`"),
      Subject::Project(name) => write!(f, "nested project `{name}`"),
    }
  }
}

#[derive(Debug, Error)]
pub enum ResolveError {
  /// Archive hash did not match the pinned value. Raised before any phase runs.
  #[error("checksum mismatch for {subject} ({url}): expected {expected}, got {actual}")]
  ChecksumMismatch {
    subject: Subject,
    url: String,
    expected: String,
    actual: String,
  },

  /// An external phase exited unsuccessfully.
  #[error("{phase} phase failed for {subject}: {}", exit_description(.code))]
  ProcessFailure {
    phase: Phase,
    subject: Subject,
    code: Option<i32>,
  },

  /// An external phase exceeded its time budget and was killed.
  #[error("{phase} phase for {subject} timed out after {}", format_timeout(.after))]
  PhaseTimeout {
    phase: Phase,
    subject: Subject,
    after: Duration,
  },

  /// A phase reported success but a promised byproduct is absent or empty.
  #[error("{phase} phase for {subject} reported success but byproduct is missing: {}", .path.display())]
  MissingByproduct {
    phase: Phase,
    subject: Subject,
    path: PathBuf,
  },

  /// Install reported success but an archive variant is in none of the library directories.
  #[error(
    "{phase} phase for {subject} reported success but archive `{variant}` is missing; searched {}",
    display_paths(.searched)
  )]
  MissingArchive {
    phase: Phase,
    subject: Subject,
    variant: String,
    searched: Vec<PathBuf>,
  },

  /// The probe missed and there is no source to build from.
  #[error("{subject} not found ({reason}) and no fetch source is declared")]
  Unresolved { subject: Subject, reason: String },

  #[error("fetch failed for {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("failed to extract {}: {message}", .archive.display())]
  Extract { archive: PathBuf, message: String },

  #[error("refusing to use {} as isolated prefix for {subject}: not a directory below {}", .path.display(), .root.display())]
  PrefixOutsideRoot {
    subject: Subject,
    path: PathBuf,
    root: PathBuf,
  },

  #[error("refusing to use system directory {} as isolated prefix for {subject}", .path.display())]
  SystemPrefix { subject: Subject, path: PathBuf },

  /// Resolution produced an artifact that cannot be wired into an interface target.
  #[error("artifact `{variant}` of {subject} is unusable: {}", .path.display())]
  UnusableArtifact {
    subject: Subject,
    variant: String,
    path: PathBuf,
  },

  #[error("invalid phase command for {subject}: {source}")]
  Placeholder {
    subject: Subject,
    #[source]
    source: PlaceholderError,
  },

  #[error("failed to spawn {phase} phase for {subject}: {source}")]
  Spawn {
    phase: Phase,
    subject: Subject,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("hash error: {0}")]
  Hash(#[from] HashError),

  #[error("failed to read or write state: {0}")]
  State(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

fn exit_description(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {code}"),
    None => "terminated by signal".to_string(),
  }
}

fn display_paths(paths: &[PathBuf]) -> String {
  let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
  shown.join(", ")
}

fn format_timeout(after: &Duration) -> humantime::FormattedDuration {
  humantime::format_duration(*after)
}
