//! Fallback builder.
//!
//! When the probe finds no usable installation, the dependency is fetched
//! from a pinned URL, verified against a pinned SHA-256, unpacked, and run
//! through configure, build and install into an isolated prefix that only
//! this dependency owns.
//!
//! # Layout
//!
//! ```text
//! <work_root>/<name>/
//! ├── downloads/          verified archives
//! ├── src/                unpacked source tree
//! └── phase-ledger.json
//! <prefix_root>/<name>/
//! ├── include/...
//! ├── lib/...
//! └── .depstrap-complete  written last
//! ```

pub mod marker;

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ExecutionConfig, is_system_dir};
use crate::error::{ResolveError, Subject};
use crate::extract::extract_archive;
use crate::fetch::fetch_archive;
use crate::ledger::{PhaseLedger, Step, StepRunner};
use crate::placeholder::{Bindings, Placeholder};
use crate::platform::Platform;
use crate::probe::{InstalledLibrary, LibrarySpec, Miss, inspect_prefix};
use crate::process::{Phase, PhaseRunner, PhaseSpec, byproduct_present};
use crate::util::hash::Fingerprint;

use marker::{read_marker, verify_marker, write_marker};

/// How to obtain and build a dependency from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFetchSpec {
  pub url: String,
  /// Pinned SHA-256, lowercase hex.
  pub sha256: String,
  /// Directory every isolated prefix of the project lives under.
  pub prefix_root: PathBuf,
  /// Isolated install prefix, owned exclusively by this dependency.
  pub prefix: PathBuf,
  /// Downloads, source tree and phase ledger.
  pub work_dir: PathBuf,
  pub configure: PhaseSpec,
  pub build: PhaseSpec,
  pub install: PhaseSpec,
}

impl Fingerprint for SourceFetchSpec {}

impl SourceFetchSpec {
  pub fn downloads_dir(&self) -> PathBuf {
    self.work_dir.join("downloads")
  }

  pub fn source_dir(&self) -> PathBuf {
    self.work_dir.join("src")
  }
}

#[derive(Debug)]
enum PrefixState {
  Complete(InstalledLibrary),
  Partial,
  Absent,
}

/// Fetch, verify, configure, build and install `library` into its isolated prefix.
///
/// A prefix carrying a valid completion marker short-circuits everything.
/// A checksum mismatch aborts before any phase runs and leaves the prefix as
/// it was, partial or absent. Each phase is checked for its exit status and its declared
/// byproducts; the install is finally checked for the header and every
/// archive variant the probe would look for.
///
/// # Returns
///
/// The installation, with one artifact per declared variant.
pub async fn fetch_build_install<R: PhaseRunner>(
  spec: &SourceFetchSpec,
  library: &LibrarySpec,
  platform: &Platform,
  execution: &ExecutionConfig,
  runner: &R,
) -> Result<InstalledLibrary, ResolveError> {
  let subject = Subject::Dependency(library.name.clone());

  if is_system_dir(&spec.prefix) {
    return Err(ResolveError::SystemPrefix {
      subject,
      path: spec.prefix.clone(),
    });
  }
  if !is_below(&spec.prefix, &spec.prefix_root) {
    return Err(ResolveError::PrefixOutsideRoot {
      subject,
      path: spec.prefix.clone(),
      root: spec.prefix_root.clone(),
    });
  }

  let partial = match inspect_existing(spec, library, platform) {
    PrefixState::Complete(installed) => {
      info!(name = %library.name, prefix = ?spec.prefix, "using completed install prefix");
      return Ok(installed);
    }
    PrefixState::Partial => true,
    PrefixState::Absent => false,
  };

  let archive = fetch_archive(&spec.url, &spec.sha256, &spec.downloads_dir(), &subject).await?;

  if partial {
    warn!(name = %library.name, prefix = ?spec.prefix, "removing partial install prefix");
    tokio::fs::remove_dir_all(&spec.prefix).await?;
  }

  let fingerprint = spec.fingerprint()?;
  let mut ledger = PhaseLedger::load(&spec.work_dir, &fingerprint);
  let source_dir = spec.source_dir();

  if ledger.completed.is_empty() || !source_dir.is_dir() {
    extract_archive(&archive, &source_dir).await?;
    ledger.clear();
  } else {
    debug!(source = ?source_dir, completed = ?ledger.completed, "resuming in existing source tree");
  }
  // The prefix is not complete at this point, so whatever the ledger says about install is stale.
  ledger.forget_from(Phase::Install);

  let bindings = Bindings::new()
    .with(Placeholder::Prefix, spec.prefix.to_string_lossy())
    .with(Placeholder::Source, source_dir.to_string_lossy())
    .with(Placeholder::Jobs, execution.jobs.to_string())
    .with(Placeholder::Name, library.name.as_str());

  let steps = StepRunner {
    runner,
    execution,
    bindings: &bindings,
    subject: &subject,
    ledger_dir: &spec.work_dir,
  };

  steps
    .run(
      &mut ledger,
      Step {
        phase: Phase::Configure,
        spec: &spec.configure,
        cwd: &source_dir,
        byproduct_root: &source_dir,
      },
    )
    .await?;

  steps
    .run(
      &mut ledger,
      Step {
        phase: Phase::Build,
        spec: &spec.build,
        cwd: &source_dir,
        byproduct_root: &source_dir,
      },
    )
    .await?;

  tokio::fs::create_dir_all(&spec.prefix).await?;
  steps
    .run(
      &mut ledger,
      Step {
        phase: Phase::Install,
        spec: &spec.install,
        cwd: &source_dir,
        byproduct_root: &spec.prefix,
      },
    )
    .await?;

  let installed = inspect_prefix(library, platform, &spec.prefix)
    .map_err(|miss| missing_from_install(miss, library, platform, &subject))?;

  write_marker(&spec.prefix).await?;

  info!(
    name = %library.name,
    prefix = ?spec.prefix,
    variants = installed.artifacts.len(),
    "built from source"
  );
  Ok(installed)
}

fn inspect_existing(spec: &SourceFetchSpec, library: &LibrarySpec, platform: &Platform) -> PrefixState {
  if !spec.prefix.exists() {
    return PrefixState::Absent;
  }

  let Some(marker) = read_marker(&spec.prefix) else {
    debug!(prefix = ?spec.prefix, "install prefix has no completion marker");
    return PrefixState::Partial;
  };

  if !verify_marker(&spec.prefix, &marker) {
    return PrefixState::Partial;
  }

  if let Some(missing) = spec
    .install
    .byproducts
    .iter()
    .map(|p| spec.prefix.join(p))
    .find(|p| !byproduct_present(p))
  {
    debug!(path = ?missing, "install byproduct missing from completed prefix");
    return PrefixState::Partial;
  }

  match inspect_prefix(library, platform, &spec.prefix) {
    Ok(installed) => PrefixState::Complete(installed),
    Err(miss) => {
      debug!(reason = %miss, "completed prefix is not a usable installation");
      PrefixState::Partial
    }
  }
}

/// `path` lexically names a directory strictly below `root`.
fn is_below(path: &Path, root: &Path) -> bool {
  if path.components().any(|c| c == Component::ParentDir) {
    return false;
  }
  let path: PathBuf = path.components().filter(|c| *c != Component::CurDir).collect();
  path != root && path.starts_with(root)
}

fn missing_from_install(miss: Miss, library: &LibrarySpec, platform: &Platform, subject: &Subject) -> ResolveError {
  match miss {
    Miss::MissingHeader { prefix } => ResolveError::MissingByproduct {
      phase: Phase::Install,
      subject: subject.clone(),
      path: prefix.join("include").join(&library.header),
    },
    Miss::MissingVariant { prefix, variant } => ResolveError::MissingArchive {
      phase: Phase::Install,
      subject: subject.clone(),
      searched: searched_archives(&prefix, platform, &variant),
      variant,
    },
  }
}

fn searched_archives(prefix: &Path, platform: &Platform, variant: &str) -> Vec<PathBuf> {
  let archive = platform.os.static_archive_name(variant);
  platform
    .library_dirs(prefix)
    .into_iter()
    .map(|dir| dir.join(&archive))
    .collect()
}
