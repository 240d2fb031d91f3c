//! Configuration pass orchestration.
//!
//! This module provides the high-level `configure` function that runs one
//! full configuration pass:
//!
//! 1. Probe for an installed copy of the library
//! 2. On a miss, fetch, verify and build it from source
//! 3. Wire the interface target (the only handle consumers see)
//! 4. Bootstrap every nested project and import its exports
//! 5. Assemble sources and declare every target
//! 6. Write the resolved build graph
//!
//! Every step runs strictly after the previous one finished; any error stops
//! the pass and nothing after it runs.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{LibraryConfig, ProjectConfig};
use crate::consts::BUILD_GRAPH_FILE;
use crate::error::{ResolveError, Subject};
use crate::fallback::fetch_build_install;
use crate::graph::{BuildGraph, GraphError};
use crate::interface::{InterfaceTarget, Resolution, wire_interface};
use crate::nested::{NestedReady, bootstrap};
use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::probe::{self, ProbeOutcome};
use crate::process::PhaseRunner;
use crate::sources::{SourceSet, assemble};

/// Knobs of one pass that are not part of the project file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigureOptions {
  /// Re-run nested project phases even when their byproducts are present.
  pub rebuild_nested: bool,
}

/// Result of a configuration pass.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigureReport {
  pub interface: Option<InterfaceTarget>,
  pub nested: Vec<NestedReady>,
  pub graph: BuildGraph,
  pub graph_path: PathBuf,
}

/// Platform used for library directory conventions: the configured OS on the host architecture.
pub fn target_platform(config: &ProjectConfig) -> Platform {
  Platform::new(Arch::current(), config.features.platform)
}

/// Run one full configuration pass.
pub async fn configure<R: PhaseRunner>(
  config: &ProjectConfig,
  runner: &R,
  options: ConfigureOptions,
) -> Result<ConfigureReport, ResolveError> {
  info!(root = ?config.root, platform = %config.features.platform, "starting configuration pass");

  let mut graph = BuildGraph::new();

  let interface = match &config.library {
    Some(library) => {
      let target = resolve_interface(config, library, runner).await?;
      graph.register_interface(target.clone())?;
      Some(target)
    }
    None => None,
  };

  let mut nested = Vec::with_capacity(config.nested.len());
  for project in &config.nested {
    nested.push(bootstrap(project, &config.execution, runner, &mut graph, options.rebuild_nested).await?);
  }

  for target in &config.targets {
    graph.declare_target(target, &config.features)?;
  }

  let graph_path = config.paths.work_root.join(BUILD_GRAPH_FILE);
  graph.write(&graph_path)?;

  info!(
    targets = graph.targets().len(),
    handles = graph.handles().count(),
    "configuration pass complete"
  );

  Ok(ConfigureReport {
    interface,
    nested,
    graph,
    graph_path,
  })
}

/// Probe, fall back to a source build, and wire the interface target.
pub async fn resolve_interface<R: PhaseRunner>(
  config: &ProjectConfig,
  library: &LibraryConfig,
  runner: &R,
) -> Result<InterfaceTarget, ResolveError> {
  let resolution = resolve_library(config, library, runner).await;
  wire_interface(&library.spec.name, resolution)
}

async fn resolve_library<R: PhaseRunner>(config: &ProjectConfig, library: &LibraryConfig, runner: &R) -> Resolution {
  let platform = target_platform(config);

  let reason = match probe::resolve(&library.spec, &platform) {
    ProbeOutcome::FoundInSystem(installed) => return Resolution::FoundInSystem(installed),
    ProbeOutcome::NotFound(reason) => reason,
  };

  let Some(fetch) = &library.fetch else {
    return Resolution::Failed(ResolveError::Unresolved {
      subject: Subject::Dependency(library.spec.name.clone()),
      reason: reason.to_string(),
    });
  };

  info!(name = %library.spec.name, url = %fetch.url, "falling back to source build");
  match fetch_build_install(fetch, &library.spec, &platform, &config.execution, runner).await {
    Ok(installed) => Resolution::BuiltFromSource(installed),
    Err(err) => Resolution::Failed(err),
  }
}

/// Run only the probe. `None` when the project declares no library.
pub fn probe_only(config: &ProjectConfig) -> Option<ProbeOutcome> {
  let library = config.library.as_ref()?;
  Some(probe::resolve(&library.spec, &target_platform(config)))
}

/// Assemble the sources of one target with the project's feature flags.
pub fn sources_for(config: &ProjectConfig, target: &str) -> Result<SourceSet, GraphError> {
  let spec = config.target(target).ok_or_else(|| GraphError::UnknownTarget {
    name: target.to_string(),
  })?;
  Ok(assemble(&spec.sources, &spec.optional, &config.features))
}

/// Remove every directory the project owns. Returns the ones that existed.
pub async fn clean(config: &ProjectConfig) -> Result<Vec<PathBuf>, ResolveError> {
  let mut removed = Vec::new();
  for dir in [
    &config.paths.prefix_root,
    &config.paths.work_root,
    &config.paths.staging_root,
  ] {
    if !dir.exists() {
      continue;
    }
    match tokio::fs::remove_dir_all(dir).await {
      Ok(()) => {
        info!(path = ?dir, "removed");
        removed.push(dir.clone());
      }
      Err(e) => {
        warn!(path = ?dir, error = %e, "failed to remove");
        return Err(e.into());
      }
    }
  }
  Ok(removed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::COMPLETE_MARKER;
  use crate::process::Phase;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{RecordingRunner, tar_gz};
  use serial_test::serial;
  use std::path::Path;
  use tempfile::TempDir;

  fn project(archive: &Path, sha256: &str, search: &Path) -> String {
    format!(
      r#"
[features]
tls = true
platform = "linux"

[library]
name = "jemalloc"
header = "jemalloc/jemalloc.h"
variants = ["jemalloc", "jemalloc_pic"]
search_paths = ['{search}']

[library.fetch]
url = '{archive}'
sha256 = "{sha256}"
configure = {{ cmd = "./configure --prefix=$${{prefix}}", byproducts = ["Makefile"] }}
build = {{ cmd = "make" }}
install = {{ cmd = "make install", byproducts = ["lib/libjemalloc.a"] }}

[[nested]]
name = "benchmark"
description = {{ file = "CMakeLists.txt", contents = "project(benchmark)" }}
configure = {{ cmd = "cmake .", byproducts = ["CMakeCache.txt"] }}
build = {{ cmd = "cmake --build ." }}
exports = [{{ name = "benchmark::benchmark", include_dirs = ["include"], libraries = ["lib/libbenchmark.a"] }}]

[[target]]
name = "bench"
sources = ["bench/main.cc", "bench/hash.cc"]
links = ["jemalloc", "benchmark::benchmark"]
optional = [{{ source = "bench/tls.cc", feature = "tls", platforms = ["linux"] }}]
"#,
      search = search.display(),
      archive = archive.display(),
      sha256 = sha256,
    )
  }

  struct Workspace {
    temp: TempDir,
    config: ProjectConfig,
  }

  fn workspace(sha_override: Option<&str>) -> Workspace {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("jemalloc-5.3.0.tar.gz");
    let bytes = tar_gz(&[("jemalloc-5.3.0/configure", "#!/bin/sh\n")]);
    std::fs::write(&archive, &bytes).unwrap();
    let sha = sha_override.map(str::to_string).unwrap_or_else(|| hash_bytes(&bytes).0);

    let content = project(&archive, &sha, &temp.path().join("usr"));
    let config = ProjectConfig::parse(&content, temp.path()).unwrap();
    Workspace { temp, config }
  }

  fn working_runner(config: &ProjectConfig) -> RecordingRunner {
    let prefix = config.paths.prefix_root.join("jemalloc");
    let staging = config.paths.staging_root.join("benchmark");
    RecordingRunner::new()
      .creates(
        Phase::Configure,
        &[PathBuf::from("Makefile"), PathBuf::from("CMakeCache.txt")],
      )
      .creates(
        Phase::Install,
        &[
          prefix.join("include/jemalloc/jemalloc.h"),
          prefix.join("lib/libjemalloc.a"),
          prefix.join("lib/libjemalloc_pic.a"),
        ],
      )
      .creates(Phase::Build, &[staging.join("lib/libbenchmark.a")])
  }

  fn install_system_copy(prefix: &Path) {
    std::fs::create_dir_all(prefix.join("include/jemalloc")).unwrap();
    std::fs::write(prefix.join("include/jemalloc/jemalloc.h"), "#pragma once\n").unwrap();
    std::fs::create_dir_all(prefix.join("lib")).unwrap();
    std::fs::write(prefix.join("lib/libjemalloc.a"), "!<arch>\n").unwrap();
    std::fs::write(prefix.join("lib/libjemalloc_pic.a"), "!<arch>\n").unwrap();
  }

  #[tokio::test]
  #[serial]
  async fn builds_from_source_when_probe_misses() {
    let ws = workspace(None);
    let runner = working_runner(&ws.config);

    let report = configure(&ws.config, &runner, ConfigureOptions::default()).await.unwrap();

    let interface = report.interface.unwrap();
    assert_eq!(interface.origin, crate::interface::Origin::BuiltFromSource);
    assert!(interface.prefix.join(COMPLETE_MARKER).exists());

    let bench = report.graph.target("bench").unwrap();
    assert_eq!(
      bench.sources(),
      &[
        PathBuf::from("bench/main.cc"),
        PathBuf::from("bench/hash.cc"),
        PathBuf::from("bench/tls.cc")
      ]
    );
    assert_eq!(report.nested[0].imported, vec!["benchmark::benchmark"]);
    assert!(report.graph_path.exists());
  }

  #[tokio::test]
  #[serial]
  async fn system_copy_skips_every_dependency_phase() {
    let ws = workspace(None);
    install_system_copy(&ws.temp.path().join("usr"));
    let runner = working_runner(&ws.config);

    let report = configure(&ws.config, &runner, ConfigureOptions::default()).await.unwrap();

    assert_eq!(
      report.interface.unwrap().origin,
      crate::interface::Origin::FoundInSystem
    );
    assert_eq!(runner.count(Phase::Install), 0);
    // Only the nested project ran.
    assert_eq!(runner.phases(), vec![Phase::Configure, Phase::Build]);
    assert!(!ws.config.paths.prefix_root.exists());
  }

  #[tokio::test]
  #[serial]
  async fn checksum_failure_stops_the_pass_before_nested_projects() {
    let ws = workspace(Some(&"0".repeat(64)));
    let runner = working_runner(&ws.config);

    let result = configure(&ws.config, &runner, ConfigureOptions::default()).await;

    assert!(matches!(result, Err(ResolveError::ChecksumMismatch { .. })));
    assert!(runner.invocations().is_empty());
    assert!(!ws.config.paths.staging_root.exists());
    assert!(!ws.config.paths.work_root.join(BUILD_GRAPH_FILE).exists());
  }

  #[tokio::test]
  #[serial]
  async fn missing_library_without_fetch_is_unresolved() {
    let mut ws = workspace(None);
    ws.config.library.as_mut().unwrap().fetch = None;

    let result = configure(&ws.config, &RecordingRunner::new(), ConfigureOptions::default()).await;

    assert!(matches!(result, Err(ResolveError::Unresolved { .. })));
  }

  #[tokio::test]
  #[serial]
  async fn second_pass_runs_nothing() {
    let ws = workspace(None);
    configure(&ws.config, &working_runner(&ws.config), ConfigureOptions::default())
      .await
      .unwrap();

    let runner = working_runner(&ws.config);
    configure(&ws.config, &runner, ConfigureOptions::default()).await.unwrap();
    assert!(runner.invocations().is_empty());

    let forced = working_runner(&ws.config);
    configure(&ws.config, &forced, ConfigureOptions { rebuild_nested: true })
      .await
      .unwrap();
    assert_eq!(forced.phases(), vec![Phase::Configure, Phase::Build]);
  }

  #[test]
  #[serial]
  fn sources_for_unknown_target_errors() {
    let ws = workspace(None);
    assert!(matches!(
      sources_for(&ws.config, "nope"),
      Err(GraphError::UnknownTarget { .. })
    ));
    let set = sources_for(&ws.config, "bench").unwrap();
    assert_eq!(set.sources.last(), Some(&PathBuf::from("bench/tls.cc")));
  }

  #[tokio::test]
  #[serial]
  async fn clean_removes_owned_directories() {
    let ws = workspace(None);
    configure(&ws.config, &working_runner(&ws.config), ConfigureOptions::default())
      .await
      .unwrap();

    let removed = clean(&ws.config).await.unwrap();

    assert_eq!(removed.len(), 3);
    assert!(!ws.config.paths.prefix_root.exists());
    assert!(ws.temp.path().join("jemalloc-5.3.0.tar.gz").exists());
  }
}
