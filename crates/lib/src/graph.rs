//! Build graph: link handles and declared targets.
//!
//! The graph enforces declaration order. A target may only be declared once
//! every link handle it names is registered, so an allocator interface or a
//! nested project's exports are always complete by the time a consumer sees
//! them. Declared targets are immutable [`BuildDescriptor`] values.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::interface::InterfaceTarget;
use crate::sources::{FeatureFlags, OptionalModule, assemble};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("link handle `{name}` is already registered with a different definition")]
  ConflictingTarget { name: String },

  #[error("target `{target}` links against `{handle}`, which is not registered")]
  UnresolvedLinkHandle { target: String, handle: String },

  #[error("target `{name}` is declared twice")]
  DuplicateTarget { name: String },

  #[error("no target named `{name}`")]
  UnknownTarget { name: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
  #[default]
  Executable,
  Library,
}

impl std::fmt::Display for TargetKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TargetKind::Executable => write!(f, "executable"),
      TargetKind::Library => write!(f, "library"),
    }
  }
}

/// A target as written in the project file, before source assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSpec {
  pub name: String,
  pub kind: TargetKind,
  pub sources: Vec<PathBuf>,
  pub links: Vec<String>,
  pub optional: Vec<OptionalModule>,
}

/// A target exported by a nested project.
///
/// Imported targets are excluded from the default build set; they are built
/// only on demand, by the targets linking against them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedTarget {
  pub name: String,
  /// Name of the nested project that produced it.
  pub provider: String,
  pub include_dirs: Vec<PathBuf>,
  pub libraries: Vec<PathBuf>,
}

/// Anything a target can link against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkHandle {
  Interface(InterfaceTarget),
  Imported(ImportedTarget),
}

impl LinkHandle {
  pub fn name(&self) -> &str {
    match self {
      LinkHandle::Interface(target) => &target.name,
      LinkHandle::Imported(target) => &target.name,
    }
  }
}

/// A declared target. Fixed at declaration: there are no mutators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDescriptor {
  name: String,
  kind: TargetKind,
  sources: Vec<PathBuf>,
  links: Vec<String>,
  features: BTreeSet<String>,
}

impl BuildDescriptor {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> TargetKind {
    self.kind
  }

  /// Compilation units, in link order.
  pub fn sources(&self) -> &[PathBuf] {
    &self.sources
  }

  pub fn links(&self) -> &[String] {
    &self.links
  }

  pub fn features(&self) -> &BTreeSet<String> {
    &self.features
  }
}

/// Registry of link handles and declared targets for one configuration pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildGraph {
  handles: BTreeMap<String, LinkHandle>,
  targets: Vec<BuildDescriptor>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the allocator's interface target.
  pub fn register_interface(&mut self, target: InterfaceTarget) -> Result<(), GraphError> {
    self.register(LinkHandle::Interface(target))
  }

  /// Register a nested project's export.
  ///
  /// Registering an identical definition again is a no-op.
  pub fn register_imported(&mut self, target: ImportedTarget) -> Result<(), GraphError> {
    self.register(LinkHandle::Imported(target))
  }

  fn register(&mut self, handle: LinkHandle) -> Result<(), GraphError> {
    let name = handle.name().to_string();
    match self.handles.get(&name) {
      Some(existing) if *existing == handle => {
        debug!(handle = %name, "link handle already registered");
        Ok(())
      }
      Some(_) => Err(GraphError::ConflictingTarget { name }),
      None => {
        debug!(handle = %name, "registered link handle");
        self.handles.insert(name, handle);
        Ok(())
      }
    }
  }

  /// Assemble a target's sources and declare it.
  ///
  /// Fails if any link handle (declared or contributed by an enabled optional
  /// module) has not been registered yet.
  pub fn declare_target(&mut self, spec: &TargetSpec, flags: &FeatureFlags) -> Result<&BuildDescriptor, GraphError> {
    if self.target(&spec.name).is_some() {
      return Err(GraphError::DuplicateTarget {
        name: spec.name.clone(),
      });
    }

    let set = assemble(&spec.sources, &spec.optional, flags);

    let mut links: Vec<String> = Vec::with_capacity(spec.links.len() + set.extra_links.len());
    for handle in spec.links.iter().chain(set.extra_links.iter()) {
      if !self.handles.contains_key(handle) {
        return Err(GraphError::UnresolvedLinkHandle {
          target: spec.name.clone(),
          handle: handle.clone(),
        });
      }
      if !links.contains(handle) {
        links.push(handle.clone());
      }
    }

    info!(target = %spec.name, sources = set.sources.len(), links = links.len(), "declared target");

    self.targets.push(BuildDescriptor {
      name: spec.name.clone(),
      kind: spec.kind,
      sources: set.sources,
      links,
      features: flags.enabled.clone(),
    });
    Ok(&self.targets[self.targets.len() - 1])
  }

  pub fn handle(&self, name: &str) -> Option<&LinkHandle> {
    self.handles.get(name)
  }

  pub fn handles(&self) -> impl Iterator<Item = &LinkHandle> {
    self.handles.values()
  }

  pub fn targets(&self) -> &[BuildDescriptor] {
    &self.targets
  }

  pub fn target(&self, name: &str) -> Option<&BuildDescriptor> {
    self.targets.iter().find(|t| t.name == name)
  }

  /// Targets built by "build everything". Imported targets are never part of it.
  pub fn default_targets(&self) -> Vec<&str> {
    self.targets.iter().map(|t| t.name.as_str()).collect()
  }

  /// Imported targets that must be built before `target`.
  pub fn on_demand_for(&self, target: &str) -> Vec<&ImportedTarget> {
    let Some(descriptor) = self.target(target) else {
      return Vec::new();
    };
    descriptor
      .links
      .iter()
      .filter_map(|name| match self.handles.get(name) {
        Some(LinkHandle::Imported(imported)) => Some(imported),
        _ => None,
      })
      .collect()
  }

  /// Write the graph as pretty JSON.
  pub fn write(&self, path: &Path) -> Result<(), crate::error::ResolveError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let document = GraphDocument {
      version: 1,
      default_targets: self.default_targets(),
      graph: self,
    };
    std::fs::write(path, serde_json::to_string_pretty(&document)?)?;
    info!(path = ?path, "wrote build graph");
    Ok(())
  }
}

#[derive(Serialize)]
struct GraphDocument<'a> {
  version: u32,
  default_targets: Vec<&'a str>,
  #[serde(flatten)]
  graph: &'a BuildGraph,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::os::Os;

  fn imported(name: &str) -> ImportedTarget {
    ImportedTarget {
      name: name.to_string(),
      provider: "benchmark".to_string(),
      include_dirs: vec![PathBuf::from("/staging/benchmark/include")],
      libraries: vec![PathBuf::from("/staging/benchmark/lib/libbenchmark.a")],
    }
  }

  fn bench_target() -> TargetSpec {
    TargetSpec {
      name: "bench".to_string(),
      kind: TargetKind::Executable,
      sources: vec![PathBuf::from("main.cc"), PathBuf::from("hash.cc")],
      links: vec!["benchmark::benchmark".to_string()],
      optional: vec![
        OptionalModule::new("tls.cc", "tls")
          .on_platforms(&[Os::Linux])
          .with_links(&["benchmark::tls"]),
      ],
    }
  }

  #[test]
  fn registering_same_import_twice_is_a_noop() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();

    assert_eq!(graph.handles().count(), 1);
  }

  #[test]
  fn conflicting_definition_is_rejected() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();

    let mut other = imported("benchmark::benchmark");
    other.libraries.clear();

    assert!(matches!(
      graph.register_imported(other),
      Err(GraphError::ConflictingTarget { name }) if name == "benchmark::benchmark"
    ));
  }

  #[test]
  fn target_before_its_dependency_is_rejected() {
    let mut graph = BuildGraph::new();
    let result = graph.declare_target(&bench_target(), &FeatureFlags::new(Os::Linux));

    assert!(matches!(
      result,
      Err(GraphError::UnresolvedLinkHandle { handle, .. }) if handle == "benchmark::benchmark"
    ));
  }

  #[test]
  fn optional_module_links_are_required_only_when_enabled() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();

    let descriptor = graph
      .declare_target(&bench_target(), &FeatureFlags::new(Os::Linux))
      .unwrap();
    assert_eq!(descriptor.sources(), &[PathBuf::from("main.cc"), PathBuf::from("hash.cc")]);

    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    let result = graph.declare_target(&bench_target(), &FeatureFlags::new(Os::Linux).with("tls"));
    assert!(matches!(result, Err(GraphError::UnresolvedLinkHandle { handle, .. }) if handle == "benchmark::tls"));
  }

  #[test]
  fn imported_targets_are_on_demand_only() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    graph
      .declare_target(&bench_target(), &FeatureFlags::new(Os::Linux))
      .unwrap();

    assert_eq!(graph.default_targets(), vec!["bench"]);
    let on_demand: Vec<&str> = graph.on_demand_for("bench").iter().map(|t| t.name.as_str()).collect();
    assert_eq!(on_demand, vec!["benchmark::benchmark"]);
    assert!(graph.on_demand_for("missing").is_empty());
  }

  #[test]
  fn duplicate_declaration_is_rejected() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    let flags = FeatureFlags::new(Os::Linux);
    graph.declare_target(&bench_target(), &flags).unwrap();

    assert!(matches!(
      graph.declare_target(&bench_target(), &flags),
      Err(GraphError::DuplicateTarget { .. })
    ));
  }

  #[test]
  fn descriptor_records_enabled_features() {
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    graph.register_imported(imported("benchmark::tls")).unwrap();

    let descriptor = graph
      .declare_target(&bench_target(), &FeatureFlags::new(Os::Linux).with("tls"))
      .unwrap();

    assert!(descriptor.features().contains("tls"));
    assert_eq!(descriptor.sources().last(), Some(&PathBuf::from("tls.cc")));
    assert_eq!(descriptor.links(), &["benchmark::benchmark".to_string(), "benchmark::tls".to_string()]);
  }

  #[test]
  fn writes_json_document() {
    let temp = tempfile::tempdir().unwrap();
    let mut graph = BuildGraph::new();
    graph.register_imported(imported("benchmark::benchmark")).unwrap();
    graph
      .declare_target(&bench_target(), &FeatureFlags::new(Os::Linux))
      .unwrap();

    let path = temp.path().join("out/build-graph.json");
    graph.write(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["default_targets"][0], "bench");
    assert_eq!(json["handles"]["benchmark::benchmark"]["type"], "imported");
    assert_eq!(json["targets"][0]["sources"][1], "hash.cc");
  }
}
