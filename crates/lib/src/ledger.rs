//! Phase ledger persistence and resumable phase execution.
//!
//! The ledger records which phases of a fallback build or nested project
//! reported success, keyed by a fingerprint of the definition that ran them.
//! On the next pass a phase is skipped only when the ledger records it AND
//! every byproduct it promised is still on disk.
//!
//! # Storage Layout
//!
//! ```text
//! <work_root>/<dependency>/phase-ledger.json
//! <staging_root>/<project>/phase-ledger.json
//! ```
//!
//! # Example Ledger
//!
//! ```json
//! {
//!   "version": 1,
//!   "fingerprint": "9f2c...",
//!   "completed": ["configure", "build"]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::consts::PHASE_LEDGER;
use crate::error::{ResolveError, Subject};
use crate::placeholder::{Bindings, substitute};
use crate::process::{Invocation, Phase, PhaseRunner, PhaseSpec, byproduct_present, run_phase};
use crate::util::hash::ContentHash;

const LEDGER_VERSION: u32 = 1;

/// Persisted record of succeeded phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLedger {
  pub version: u32,
  pub fingerprint: String,
  pub completed: BTreeSet<Phase>,
}

impl PhaseLedger {
  pub fn new(fingerprint: &ContentHash) -> Self {
    Self {
      version: LEDGER_VERSION,
      fingerprint: fingerprint.0.clone(),
      completed: BTreeSet::new(),
    }
  }

  /// Load the ledger in `dir`, discarding it when it belongs to another definition.
  ///
  /// A missing, unreadable or stale ledger yields an empty one; it never fails the pass.
  pub fn load(dir: &Path, fingerprint: &ContentHash) -> Self {
    let path = dir.join(PHASE_LEDGER);
    let Ok(content) = std::fs::read_to_string(&path) else {
      return Self::new(fingerprint);
    };

    match serde_json::from_str::<PhaseLedger>(&content) {
      Ok(ledger) if ledger.version == LEDGER_VERSION && ledger.fingerprint == fingerprint.0 => {
        debug!(path = ?path, completed = ?ledger.completed, "loaded phase ledger");
        ledger
      }
      Ok(_) => {
        info!(path = ?path, "definition changed, discarding phase ledger");
        Self::new(fingerprint)
      }
      Err(e) => {
        warn!(path = ?path, error = %e, "unreadable phase ledger, starting over");
        Self::new(fingerprint)
      }
    }
  }

  /// Write atomically: temp file, then rename.
  pub fn save(&self, dir: &Path) -> Result<(), ResolveError> {
    std::fs::create_dir_all(dir)?;
    let content = serde_json::to_string_pretty(self)?;
    let temp_path = dir.join(format!("{PHASE_LEDGER}.tmp"));
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, dir.join(PHASE_LEDGER))?;
    Ok(())
  }

  pub fn is_recorded(&self, phase: Phase) -> bool {
    self.completed.contains(&phase)
  }

  pub fn record(&mut self, phase: Phase) {
    self.completed.insert(phase);
  }

  /// Forget `phase` and every phase after it; a re-run invalidates what followed.
  pub fn forget_from(&mut self, phase: Phase) {
    self.completed.retain(|p| *p < phase);
  }

  pub fn clear(&mut self) {
    self.completed.clear();
  }
}

/// One phase to run under the ledger skip rule.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
  pub phase: Phase,
  pub spec: &'a PhaseSpec,
  /// Working directory of the process.
  pub cwd: &'a Path,
  /// Directory the phase's byproducts are relative to.
  pub byproduct_root: &'a Path,
}

impl Step<'_> {
  fn byproducts(&self) -> Vec<PathBuf> {
    self.spec.byproducts.iter().map(|p| self.byproduct_root.join(p)).collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
  Ran,
  Skipped,
}

/// Shared context of every step of one fallback build or nested project.
pub struct StepRunner<'a, R: PhaseRunner> {
  pub runner: &'a R,
  pub execution: &'a ExecutionConfig,
  pub bindings: &'a Bindings,
  pub subject: &'a Subject,
  /// Directory holding the ledger file.
  pub ledger_dir: &'a Path,
}

impl<R: PhaseRunner> StepRunner<'_, R> {
  /// Run `step` unless the ledger and the byproducts both say it already succeeded.
  ///
  /// The ledger entry is written only after the process succeeded AND every
  /// byproduct is present, so an interrupted or lying phase is never trusted.
  pub async fn run(&self, ledger: &mut PhaseLedger, step: Step<'_>) -> Result<StepStatus, ResolveError> {
    let byproducts = step.byproducts();

    if ledger.is_recorded(step.phase) && byproducts.iter().all(|p| byproduct_present(p)) {
      debug!(phase = %step.phase, subject = %self.subject, "phase already complete, skipping");
      return Ok(StepStatus::Skipped);
    }

    ledger.forget_from(step.phase);
    ledger.save(self.ledger_dir)?;

    let invocation = self.invocation(&step)?;
    run_phase(self.runner, &invocation, self.subject).await?;

    if let Some(missing) = byproducts.into_iter().find(|p| !byproduct_present(p)) {
      return Err(ResolveError::MissingByproduct {
        phase: step.phase,
        subject: self.subject.clone(),
        path: missing,
      });
    }

    ledger.record(step.phase);
    ledger.save(self.ledger_dir)?;
    Ok(StepStatus::Ran)
  }

  fn invocation(&self, step: &Step<'_>) -> Result<Invocation, ResolveError> {
    let placeholder_error = |source| ResolveError::Placeholder {
      subject: self.subject.clone(),
      source,
    };

    let cmd = substitute(&step.spec.cmd, self.bindings).map_err(placeholder_error)?;
    let env = step
      .spec
      .env
      .iter()
      .map(|(key, value)| Ok((key.clone(), substitute(value, self.bindings).map_err(placeholder_error)?)))
      .collect::<Result<BTreeMap<_, _>, ResolveError>>()?;

    Ok(Invocation {
      phase: step.phase,
      cmd,
      cwd: step.cwd.to_path_buf(),
      env,
      timeout: self.execution.phase_timeout,
    })
  }
}
