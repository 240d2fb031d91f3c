//! Interface target: the single link handle for a resolved library.
//!
//! Both resolution paths end here. [`wire_interface`] is the only place that
//! branches on how the library was obtained; everything downstream sees an
//! [`InterfaceTarget`] whose [`LinkInterface`] view has the same shape for a
//! system installation and for a source build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{ResolveError, Subject};
use crate::probe::{InstalledLibrary, ResolvedArtifact};

/// Outcome of resolving one library. Exactly one of these per pass.
#[derive(Debug)]
pub enum Resolution {
  FoundInSystem(InstalledLibrary),
  BuiltFromSource(InstalledLibrary),
  Failed(ResolveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
  FoundInSystem,
  BuiltFromSource,
}

impl std::fmt::Display for Origin {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Origin::FoundInSystem => write!(f, "found in system"),
      Origin::BuiltFromSource => write!(f, "built from source"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceTarget {
  pub name: String,
  /// Informational only; consumers must not branch on it.
  pub origin: Origin,
  pub prefix: PathBuf,
  pub include_dirs: Vec<PathBuf>,
  /// One archive per variant, in declaration order.
  pub artifacts: Vec<ResolvedArtifact>,
}

/// What a consumer receives when linking against an interface target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInterface<'a> {
  pub include_dirs: &'a [PathBuf],
  pub archives: BTreeMap<&'a str, &'a Path>,
}

impl InterfaceTarget {
  pub fn link_interface(&self) -> LinkInterface<'_> {
    LinkInterface {
      include_dirs: &self.include_dirs,
      archives: self
        .artifacts
        .iter()
        .map(|a| (a.variant.as_str(), a.path.as_path()))
        .collect(),
    }
  }

  pub fn archive(&self, variant: &str) -> Option<&Path> {
    self
      .artifacts
      .iter()
      .find(|a| a.variant == variant)
      .map(|a| a.path.as_path())
  }

  /// `cargo:` directives linking `variant` statically (the first declared variant by default).
  ///
  /// Returns `None` when the variant is not part of this target.
  pub fn cargo_directives(&self, variant: Option<&str>) -> Option<Vec<String>> {
    let artifact = match variant {
      Some(name) => self.artifacts.iter().find(|a| a.variant == name)?,
      None => self.artifacts.first()?,
    };
    let search_dir = artifact.path.parent()?;

    let mut directives = vec![
      format!("cargo:rustc-link-search=native={}", search_dir.display()),
      format!("cargo:rustc-link-lib=static={}", artifact.variant),
    ];
    directives.extend(self.include_dirs.iter().map(|dir| format!("cargo:include={}", dir.display())));
    directives.push(format!("cargo:root={}", self.prefix.display()));
    Some(directives)
  }
}

/// Turn a resolution into the interface target, or propagate its failure.
///
/// Every artifact is re-validated here, whichever path produced it, so a
/// consumer never receives a handle to a missing or empty archive.
pub fn wire_interface(name: &str, resolution: Resolution) -> Result<InterfaceTarget, ResolveError> {
  let (origin, installed) = match resolution {
    Resolution::FoundInSystem(installed) => (Origin::FoundInSystem, installed),
    Resolution::BuiltFromSource(installed) => (Origin::BuiltFromSource, installed),
    Resolution::Failed(err) => return Err(err),
  };

  let subject = Subject::Dependency(name.to_string());

  if !installed.include_dir.is_dir() {
    return Err(ResolveError::UnusableArtifact {
      subject,
      variant: "include".to_string(),
      path: installed.include_dir,
    });
  }

  if let Some(bad) = installed.artifacts.iter().find(|a| !a.is_usable()) {
    return Err(ResolveError::UnusableArtifact {
      subject,
      variant: bad.variant.clone(),
      path: bad.path.clone(),
    });
  }

  info!(name = %name, origin = %origin, prefix = ?installed.prefix, "wired interface target");

  Ok(InterfaceTarget {
    name: name.to_string(),
    origin,
    prefix: installed.prefix,
    include_dirs: vec![installed.include_dir],
    artifacts: installed.artifacts,
  })
}
