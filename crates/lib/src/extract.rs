//! Archive unpacking.
//!
//! `.tar.gz`, `.tgz`, `.tar` and `.zip` are unpacked in-process; other
//! formats (`.tar.bz2`, `.tar.xz`) are handed to the system `tar`. A single
//! top-level directory, as found in most release tarballs, is stripped so
//! the source tree always lands directly in the destination.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
  External,
}

impl ArchiveKind {
  fn detect(path: &Path) -> Self {
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().to_ascii_lowercase())
      .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      ArchiveKind::TarGz
    } else if name.ends_with(".tar") {
      ArchiveKind::Tar
    } else if name.ends_with(".zip") {
      ArchiveKind::Zip
    } else {
      ArchiveKind::External
    }
  }
}

/// Unpack `archive` into `dest`, replacing anything already there.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ResolveError> {
  info!(archive = ?archive, dest = ?dest, "extracting archive");

  let staging = dest.with_extension("partial");
  if staging.exists() {
    tokio::fs::remove_dir_all(&staging).await?;
  }
  tokio::fs::create_dir_all(&staging).await?;

  let kind = ArchiveKind::detect(archive);
  match kind {
    ArchiveKind::External => unpack_external(archive, &staging).await?,
    _ => {
      let archive_path = archive.to_path_buf();
      let target = staging.clone();
      tokio::task::spawn_blocking(move || unpack_in_process(kind, &archive_path, &target))
        .await
        .map_err(|e| extract_error(archive, e.to_string()))??;
    }
  }

  if dest.exists() {
    tokio::fs::remove_dir_all(dest).await?;
  }

  let root = single_top_level_dir(&staging)?;
  match root {
    Some(inner) => {
      debug!(dir = ?inner, "stripping top-level directory");
      tokio::fs::rename(&inner, dest).await?;
      tokio::fs::remove_dir_all(&staging).await?;
    }
    None => tokio::fs::rename(&staging, dest).await?,
  }

  Ok(())
}

fn unpack_in_process(kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<(), ResolveError> {
  let file = File::open(archive)?;
  let result = match kind {
    ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(file))
      .unpack(dest)
      .map_err(|e| e.to_string()),
    ArchiveKind::Tar => tar::Archive::new(file).unpack(dest).map_err(|e| e.to_string()),
    ArchiveKind::Zip => zip::ZipArchive::new(file)
      .and_then(|mut zip| zip.extract(dest))
      .map_err(|e| e.to_string()),
    ArchiveKind::External => unreachable!("external archives are not unpacked in-process"),
  };
  result.map_err(|message| extract_error(archive, message))
}

async fn unpack_external(archive: &Path, dest: &Path) -> Result<(), ResolveError> {
  debug!(archive = ?archive, "delegating to system tar");
  let output = Command::new("tar")
    .arg("-xf")
    .arg(archive)
    .arg("-C")
    .arg(dest)
    .output()
    .await
    .map_err(|e| extract_error(archive, format!("failed to run tar: {e}")))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(extract_error(archive, stderr.trim().to_string()));
  }
  Ok(())
}

fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
  let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
  if entries.len() != 1 {
    return Ok(None);
  }
  let entry = entries.remove(0);
  Ok(entry.file_type()?.is_dir().then(|| entry.path()))
}

fn extract_error(archive: &Path, message: String) -> ResolveError {
  ResolveError::Extract {
    archive: archive.to_path_buf(),
    message,
  }
}
