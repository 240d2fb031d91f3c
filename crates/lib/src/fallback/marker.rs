//! Completion marker of an isolated install prefix.
//!
//! Written only after the install phase and every byproduct check passed.
//! It carries a hash of the prefix contents so a prefix tampered with (or
//! half-overwritten) after completion is detected and rebuilt.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::COMPLETE_MARKER;
use crate::error::ResolveError;
use crate::util::hash::hash_directory;

/// Files excluded when hashing a prefix; the marker is written after the hash.
const PREFIX_HASH_EXCLUSIONS: &[&str] = &[COMPLETE_MARKER];

/// Marker file content structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMarker {
  /// Marker format version.
  pub version: u32,
  /// Always "complete"; anything else is treated as partial.
  pub status: String,
  /// Full SHA-256 of the prefix contents.
  pub output_hash: String,
}

/// Hash the prefix and write the marker into it.
pub async fn write_marker(prefix: &Path) -> Result<PrefixMarker, ResolveError> {
  let output_hash = hash_directory(prefix, PREFIX_HASH_EXCLUSIONS)?;

  let marker = PrefixMarker {
    version: 1,
    status: "complete".to_string(),
    output_hash: output_hash.0,
  };
  let content = serde_json::to_string(&marker)?;
  tokio::fs::write(prefix.join(COMPLETE_MARKER), format!("{content}\n")).await?;
  Ok(marker)
}

/// Read the marker, `None` when it is absent or unparseable.
pub fn read_marker(prefix: &Path) -> Option<PrefixMarker> {
  let content = std::fs::read_to_string(prefix.join(COMPLETE_MARKER)).ok()?;
  match serde_json::from_str(&content) {
    Ok(marker) => Some(marker),
    Err(e) => {
      debug!(path = ?prefix, error = %e, "invalid completion marker");
      None
    }
  }
}

/// Returns `true` when the prefix still hashes to the value recorded in `marker`.
pub fn verify_marker(prefix: &Path, marker: &PrefixMarker) -> bool {
  if marker.status != "complete" {
    return false;
  }

  match hash_directory(prefix, PREFIX_HASH_EXCLUSIONS) {
    Ok(current) if current.0 == marker.output_hash => true,
    Ok(current) => {
      warn!(
        path = ?prefix,
        expected = %marker.output_hash,
        actual = %current.0,
        "install prefix changed since completion"
      );
      false
    }
    Err(e) => {
      warn!(path = ?prefix, error = %e, "failed to hash install prefix");
      false
    }
  }
}
