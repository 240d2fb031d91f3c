//! Probe for a pre-installed copy of a native library.
//!
//! The probe is a pure read of conventional installation prefixes. It never
//! writes and never fails: a miss is reported as [`ProbeOutcome::NotFound`]
//! with the reason, which triggers the fallback builder.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::platform::Platform;
use crate::process::byproduct_present;

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySpec {
  pub name: String,
  /// Marker header, relative to an include directory (e.g. `jemalloc/jemalloc.h`).
  pub header: PathBuf,
  /// Artifact variants in declaration order (e.g. `jemalloc`, `jemalloc_pic`).
  pub variants: Vec<String>,
  /// Installation prefixes searched in order.
  pub search_paths: Vec<PathBuf>,
}

/// A single static archive of a resolved library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
  pub variant: String,
  pub path: PathBuf,
}

impl ResolvedArtifact {
  /// Returns `None` unless `path` is absolute, exists and is non-empty.
  pub fn checked(variant: &str, path: PathBuf) -> Option<Self> {
    (path.is_absolute() && path.is_file() && byproduct_present(&path)).then(|| Self {
      variant: variant.to_string(),
      path,
    })
  }

  pub fn is_usable(&self) -> bool {
    self.path.is_absolute() && self.path.is_file() && byproduct_present(&self.path)
  }
}

/// A complete installation: header and every archive variant under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledLibrary {
  pub prefix: PathBuf,
  pub include_dir: PathBuf,
  pub artifacts: Vec<ResolvedArtifact>,
}

/// Why a search hint did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Miss {
  MissingHeader { prefix: PathBuf },
  MissingVariant { prefix: PathBuf, variant: String },
}

impl std::fmt::Display for Miss {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Miss::MissingHeader { prefix } => write!(f, "{}: header not found", prefix.display()),
      Miss::MissingVariant { prefix, variant } => {
        write!(f, "{}: archive `{}` not found", prefix.display(), variant)
      }
    }
  }
}

/// Non-fatal probe miss (`ProbeInconclusive`), one entry per search hint tried.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeInconclusive {
  pub misses: Vec<Miss>,
}

impl std::fmt::Display for ProbeInconclusive {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.misses.is_empty() {
      return write!(f, "no search paths configured");
    }
    let parts: Vec<String> = self.misses.iter().map(|m| m.to_string()).collect();
    write!(f, "{}", parts.join("; "))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
  FoundInSystem(InstalledLibrary),
  NotFound(ProbeInconclusive),
}

/// Search the declared hints for a complete installation.
///
/// A prefix matches only when the header and every variant are present there,
/// so header and archives never come from different installations. The first
/// matching prefix in hint order wins; within a prefix, library directories
/// are tried in [`Platform::library_dirs`] order.
pub fn resolve(spec: &LibrarySpec, platform: &Platform) -> ProbeOutcome {
  let mut inconclusive = ProbeInconclusive::default();

  for prefix in &spec.search_paths {
    match inspect_prefix(spec, platform, prefix) {
      Ok(found) => {
        info!(
          name = %spec.name,
          prefix = ?found.prefix,
          variants = found.artifacts.len(),
          "found installed library"
        );
        return ProbeOutcome::FoundInSystem(found);
      }
      Err(miss) => {
        debug!(name = %spec.name, reason = %miss, "search path rejected");
        inconclusive.misses.push(miss);
      }
    }
  }

  info!(name = %spec.name, reason = %inconclusive, "library not found on system");
  ProbeOutcome::NotFound(inconclusive)
}

pub(crate) fn inspect_prefix(spec: &LibrarySpec, platform: &Platform, prefix: &Path) -> Result<InstalledLibrary, Miss> {
  let prefix = if prefix.is_absolute() {
    prefix.to_path_buf()
  } else {
    std::path::absolute(prefix).unwrap_or_else(|_| prefix.to_path_buf())
  };

  let include_dir = prefix.join("include");
  if !include_dir.join(&spec.header).is_file() {
    return Err(Miss::MissingHeader { prefix });
  }

  let lib_dirs = platform.library_dirs(&prefix);
  let mut artifacts = Vec::with_capacity(spec.variants.len());

  for variant in &spec.variants {
    let file_name = platform.os.static_archive_name(variant);
    let artifact = lib_dirs
      .iter()
      .find_map(|dir| ResolvedArtifact::checked(variant, dir.join(&file_name)));

    match artifact {
      Some(artifact) => artifacts.push(artifact),
      None => {
        return Err(Miss::MissingVariant {
          prefix,
          variant: variant.clone(),
        });
      }
    }
  }

  Ok(InstalledLibrary {
    prefix,
    include_dir,
    artifacts,
  })
}
