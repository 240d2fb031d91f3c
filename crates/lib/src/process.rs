//! External phase execution.
//!
//! Phases (configure, build, install) are opaque shell commands. The core only
//! consumes their exit status; captured output is kept for debug logging.
//! Execution goes through the [`PhaseRunner`] trait so the orchestration logic
//! can be exercised without spawning real processes.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ResolveError, Subject};

/// An external build phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Configure,
  Build,
  Install,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Phase::Configure => "configuration",
      Phase::Build => "build",
      Phase::Install => "install",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A phase as declared in the project file.
///
/// `byproducts` are relative to the directory the phase writes into (the
/// source tree for configure/build, the install prefix for install, the
/// staging directory for nested projects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseSpec {
  pub cmd: String,
  #[serde(default)]
  pub byproducts: Vec<PathBuf>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl PhaseSpec {
  pub fn new(cmd: &str) -> Self {
    Self {
      cmd: cmd.to_string(),
      byproducts: Vec::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn with_byproducts(mut self, byproducts: &[&str]) -> Self {
    self.byproducts = byproducts.iter().map(PathBuf::from).collect();
    self
  }
}

/// A fully resolved phase command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub phase: Phase,
  pub cmd: String,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
  pub timeout: Option<Duration>,
}

/// Structured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
  /// Exit code, `None` when the process was terminated by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  pub timed_out: bool,
}

impl ProcessOutcome {
  pub fn success(&self) -> bool {
    !self.timed_out && self.code == Some(0)
  }
}

/// Runs phase invocations to completion.
///
/// Implementations must block until the process has exited (or was killed
/// after its timeout); the orchestrator never overlaps two phases.
pub trait PhaseRunner {
  fn run(&self, invocation: &Invocation) -> impl Future<Output = std::io::Result<ProcessOutcome>> + Send;
}

/// Runs phases through a system shell.
///
/// The environment is inherited so configure scripts find the host
/// toolchain on `PATH`. Only locale and `SOURCE_DATE_EPOCH` are pinned.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
  shell: Option<String>,
}

impl ShellRunner {
  pub fn new(shell: Option<String>) -> Self {
    Self { shell }
  }
}

impl PhaseRunner for ShellRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutcome> {
    let (shell_cmd, shell_args) = get_shell(self.shell.as_deref());

    let mut command = Command::new(&shell_cmd);
    command
      .args(&shell_args)
      .arg(&invocation.cmd)
      .current_dir(&invocation.cwd)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      // 315532800 = 1980-01-01T00:00:00Z (ZIP epoch)
      .env("SOURCE_DATE_EPOCH", "315532800")
      .envs(&invocation.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(shell = %shell_cmd, cwd = ?invocation.cwd, phase = %invocation.phase, "spawning process");

    let child = command.spawn()?;
    let wait = child.wait_with_output();

    let output = match invocation.timeout {
      Some(limit) => match tokio::time::timeout(limit, wait).await {
        Ok(output) => output?,
        // Dropping the future drops the child, which kills it.
        Err(_) => {
          return Ok(ProcessOutcome {
            code: None,
            timed_out: true,
            ..Default::default()
          });
        }
      },
      None => wait.await?,
    };

    Ok(ProcessOutcome {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      timed_out: false,
    })
  }
}

/// Run one phase and map its outcome into the error taxonomy.
pub async fn run_phase(
  runner: &impl PhaseRunner,
  invocation: &Invocation,
  subject: &Subject,
) -> Result<ProcessOutcome, ResolveError> {
  info!(phase = %invocation.phase, subject = %subject, cmd = %invocation.cmd, "running phase");

  let outcome = runner.run(invocation).await.map_err(|source| ResolveError::Spawn {
    phase: invocation.phase,
    subject: subject.clone(),
    source,
  })?;

  if !outcome.stdout.is_empty() {
    debug!(stdout = %outcome.stdout, "phase stdout");
  }
  if !outcome.stderr.is_empty() {
    debug!(stderr = %outcome.stderr, "phase stderr");
  }

  if outcome.timed_out {
    return Err(ResolveError::PhaseTimeout {
      phase: invocation.phase,
      subject: subject.clone(),
      after: invocation.timeout.unwrap_or_default(),
    });
  }

  if !outcome.success() {
    return Err(ResolveError::ProcessFailure {
      phase: invocation.phase,
      subject: subject.clone(),
      code: outcome.code,
    });
  }

  Ok(outcome)
}

/// Returns true when `path` exists and is a non-empty file, or an existing directory.
pub fn byproduct_present(path: &Path) -> bool {
  match std::fs::metadata(path) {
    Ok(meta) if meta.is_file() => meta.len() > 0,
    Ok(meta) => meta.is_dir(),
    Err(_) => false,
  }
}

/// Get the shell command and argument for the current platform.
///
/// Defaults to `/bin/sh` rather than `$SHELL` so user profiles are never sourced.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn invocation(cmd: &str, cwd: &Path) -> Invocation {
    Invocation {
      phase: Phase::Build,
      cmd: cmd.to_string(),
      cwd: cwd.to_path_buf(),
      env: BTreeMap::new(),
      timeout: Some(Duration::from_secs(30)),
    }
  }

  fn subject() -> Subject {
    Subject::Dependency("jemalloc".to_string())
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn captures_stdout_and_exit_code() {
    let temp = TempDir::new().unwrap();
    let outcome = ShellRunner::default()
      .run(&invocation("echo hello", temp.path()))
      .await
      .unwrap();

    assert_eq!(outcome.code, Some(0));
    assert_eq!(outcome.stdout, "hello");
    assert!(outcome.success());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn environment_is_inherited_and_extended() {
    let temp = TempDir::new().unwrap();
    let mut inv = invocation("echo $MY_VAR:$SOURCE_DATE_EPOCH", temp.path());
    inv.env.insert("MY_VAR".to_string(), "my_value".to_string());

    let outcome = ShellRunner::default().run(&inv).await.unwrap();

    assert_eq!(outcome.stdout, "my_value:315532800");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn runs_in_working_directory() {
    let temp = TempDir::new().unwrap();
    ShellRunner::default()
      .run(&invocation("touch cwd_marker", temp.path()))
      .await
      .unwrap();

    assert!(temp.path().join("cwd_marker").exists());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn non_zero_exit_maps_to_process_failure() {
    let temp = TempDir::new().unwrap();
    let result = run_phase(&ShellRunner::default(), &invocation("exit 3", temp.path()), &subject()).await;

    assert!(matches!(
      result,
      Err(ResolveError::ProcessFailure {
        phase: Phase::Build,
        code: Some(3),
        ..
      })
    ));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn timeout_kills_and_maps_to_phase_timeout() {
    let temp = TempDir::new().unwrap();
    let mut inv = invocation("sleep 5", temp.path());
    inv.timeout = Some(Duration::from_millis(100));

    let result = run_phase(&ShellRunner::default(), &inv, &subject()).await;

    assert!(matches!(result, Err(ResolveError::PhaseTimeout { phase: Phase::Build, .. })));
  }

  #[tokio::test]
  async fn missing_working_directory_is_a_spawn_error() {
    let temp = TempDir::new().unwrap();
    let inv = invocation("echo hi", &temp.path().join("missing"));

    let result = run_phase(&ShellRunner::default(), &inv, &subject()).await;

    assert!(matches!(result, Err(ResolveError::Spawn { .. })));
  }

  #[test]
  fn byproduct_presence_requires_non_empty_file() {
    let temp = TempDir::new().unwrap();
    let empty = temp.path().join("empty.a");
    let full = temp.path().join("full.a");
    std::fs::write(&empty, "").unwrap();
    std::fs::write(&full, "!<arch>").unwrap();

    assert!(!byproduct_present(&empty));
    assert!(byproduct_present(&full));
    assert!(byproduct_present(temp.path()));
    assert!(!byproduct_present(&temp.path().join("absent")));
  }

  #[test]
  fn get_shell_with_override() {
    let (shell, arg) = get_shell(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(arg, vec!["-c"]);
  }

  #[test]
  fn get_shell_with_cmd_override() {
    let (shell, args) = get_shell(Some("cmd.exe"));
    assert_eq!(shell, "cmd.exe");
    assert_eq!(args, vec!["/C"]);
  }

  #[test]
  fn phase_labels() {
    assert_eq!(Phase::Configure.to_string(), "configuration");
    assert_eq!(Phase::Build.to_string(), "build");
    assert_eq!(Phase::Install.to_string(), "install");
  }
}
