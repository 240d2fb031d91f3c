//! Nested build bootstrapper.
//!
//! A helper project (e.g. a benchmarking framework) is built in its own
//! staging directory before any target that needs it is declared: its build
//! description is written out, then it is configured and built. Configure
//! failing means build never runs. On success its exports are registered in
//! the build graph as on-demand imported targets.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExecutionConfig;
use crate::error::{ResolveError, Subject};
use crate::graph::{BuildGraph, ImportedTarget};
use crate::ledger::{PhaseLedger, Step, StepRunner, StepStatus};
use crate::placeholder::{Bindings, Placeholder};
use crate::process::{Phase, PhaseRunner, PhaseSpec, byproduct_present};
use crate::util::hash::Fingerprint;

/// Self-contained build description written into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptionFile {
  /// File name, relative to the staging directory (e.g. `CMakeLists.txt`).
  pub file: PathBuf,
  pub contents: String,
}

/// A target the helper project exposes. Paths are relative to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportedTarget {
  pub name: String,
  #[serde(default)]
  pub include_dirs: Vec<PathBuf>,
  #[serde(default)]
  pub libraries: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedProjectSpec {
  pub name: String,
  /// Private build tree, owned exclusively by this project.
  pub staging_dir: PathBuf,
  pub description: DescriptionFile,
  pub configure: PhaseSpec,
  pub build: PhaseSpec,
  pub exports: Vec<ExportedTarget>,
}

impl Fingerprint for NestedProjectSpec {}

impl NestedProjectSpec {
  /// Exports with paths made absolute against the staging directory.
  pub fn imported_targets(&self) -> Vec<ImportedTarget> {
    self
      .exports
      .iter()
      .map(|export| ImportedTarget {
        name: export.name.clone(),
        provider: self.name.clone(),
        include_dirs: export.include_dirs.iter().map(|p| self.staging_dir.join(p)).collect(),
        libraries: export.libraries.iter().map(|p| self.staging_dir.join(p)).collect(),
      })
      .collect()
  }
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedReady {
  pub project: String,
  /// Phases that actually ran in this pass; empty when everything was already built.
  pub ran: Vec<Phase>,
  pub imported: Vec<String>,
}

/// Configure and build a nested project, then import its exports into `graph`.
///
/// Idempotent: a phase whose ledger entry and byproducts are present is not
/// re-run. `force` discards the ledger so both phases run again.
pub async fn bootstrap<R: PhaseRunner>(
  spec: &NestedProjectSpec,
  execution: &ExecutionConfig,
  runner: &R,
  graph: &mut BuildGraph,
  force: bool,
) -> Result<NestedReady, ResolveError> {
  let subject = Subject::Project(spec.name.clone());
  info!(project = %spec.name, staging = ?spec.staging_dir, "bootstrapping nested project");

  tokio::fs::create_dir_all(&spec.staging_dir).await?;
  write_description(spec).await?;

  let fingerprint = spec.fingerprint()?;
  let mut ledger = PhaseLedger::load(&spec.staging_dir, &fingerprint);
  if force {
    debug!(project = %spec.name, "forced rebuild, discarding ledger");
    ledger.clear();
  }

  let staging = spec.staging_dir.to_string_lossy();
  let bindings = Bindings::new()
    .with(Placeholder::Staging, staging.as_ref())
    .with(Placeholder::Source, staging.as_ref())
    .with(Placeholder::Jobs, execution.jobs.to_string())
    .with(Placeholder::Name, spec.name.as_str());

  let steps = StepRunner {
    runner,
    execution,
    bindings: &bindings,
    subject: &subject,
    ledger_dir: &spec.staging_dir,
  };

  let mut ran = Vec::new();
  for (phase, phase_spec) in [(Phase::Configure, &spec.configure), (Phase::Build, &spec.build)] {
    let step = Step {
      phase,
      spec: phase_spec,
      cwd: &spec.staging_dir,
      byproduct_root: &spec.staging_dir,
    };
    if steps.run(&mut ledger, step).await? == StepStatus::Ran {
      ran.push(phase);
    }
  }

  let imported = spec.imported_targets();
  for target in &imported {
    if let Some(missing) = target.libraries.iter().find(|p| !byproduct_present(p)) {
      return Err(ResolveError::MissingByproduct {
        phase: Phase::Build,
        subject,
        path: missing.clone(),
      });
    }
  }

  let mut names = Vec::with_capacity(imported.len());
  for target in imported {
    names.push(target.name.clone());
    graph.register_imported(target)?;
  }

  info!(project = %spec.name, ran = ?ran, imported = ?names, "nested project ready");
  Ok(NestedReady {
    project: spec.name.clone(),
    ran,
    imported: names,
  })
}

/// Write the description only when its contents changed, so the helper's own
/// build system does not see a fresh timestamp on every pass.
async fn write_description(spec: &NestedProjectSpec) -> Result<(), ResolveError> {
  let path = spec.staging_dir.join(&spec.description.file);
  let existing = tokio::fs::read_to_string(&path).await.ok();
  if existing.as_deref() == Some(spec.description.contents.as_str()) {
    debug!(path = ?path, "build description unchanged");
    return Ok(());
  }

  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  tokio::fs::write(&path, &spec.description.contents).await?;
  debug!(path = ?path, "wrote build description");
  Ok(())
}
