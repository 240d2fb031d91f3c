//! Archive download with SHA-256 verification.
//!
//! The archive is verified in memory before it is written to the downloads
//! directory, so a mismatching archive never lands on disk next to trusted
//! ones. A cached archive is reused only if it still hashes to the pinned
//! value.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ResolveError, Subject};
use crate::util::hash::{ContentHash, hash_bytes, hash_file};

/// Fetch `url` into `downloads_dir` and verify it against `expected_sha256`.
///
/// `url` may be `http(s)://`, `file://` or a plain filesystem path.
///
/// # Returns
///
/// The path of the verified archive.
pub async fn fetch_archive(
  url: &str,
  expected_sha256: &str,
  downloads_dir: &Path,
  subject: &Subject,
) -> Result<PathBuf, ResolveError> {
  info!(url = %url, "fetching archive");

  fs::create_dir_all(downloads_dir).await?;
  let dest_path = downloads_dir.join(url_to_filename(url));

  if dest_path.exists() {
    debug!(path = ?dest_path, "checking cached archive");
    match hash_file(&dest_path) {
      Ok(actual) if actual.matches(expected_sha256) => {
        info!(path = ?dest_path, "using cached archive");
        return Ok(dest_path);
      }
      Ok(actual) => {
        warn!(expected = %expected_sha256, actual = %actual, "cached archive hash mismatch, fetching again");
      }
      Err(e) => warn!(error = %e, "cached archive unreadable, fetching again"),
    }
    fs::remove_file(&dest_path).await?;
  }

  let bytes = read_source(url).await?;

  let actual = hash_bytes(&bytes);
  verify(&actual, expected_sha256, url, subject)?;

  // Write under a temporary name so an interrupted write is never mistaken for a download.
  let partial = dest_path.with_extension("partial");
  let mut file = fs::File::create(&partial).await?;
  file.write_all(&bytes).await?;
  file.flush().await?;
  drop(file);
  fs::rename(&partial, &dest_path).await?;

  info!(path = ?dest_path, size = bytes.len(), "download verified");
  Ok(dest_path)
}

fn verify(actual: &ContentHash, expected: &str, url: &str, subject: &Subject) -> Result<(), ResolveError> {
  if actual.matches(expected) {
    return Ok(());
  }
  Err(ResolveError::ChecksumMismatch {
    subject: subject.clone(),
    url: url.to_string(),
    expected: expected.to_ascii_lowercase(),
    actual: actual.0.clone(),
  })
}

async fn read_source(url: &str) -> Result<Vec<u8>, ResolveError> {
  if let Some(path) = local_path(url) {
    return fs::read(&path).await.map_err(|e| ResolveError::FetchFailed {
      url: url.to_string(),
      message: e.to_string(),
    });
  }

  let response = reqwest::get(url).await.map_err(|e| ResolveError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if !response.status().is_success() {
    return Err(ResolveError::FetchFailed {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let bytes = response.bytes().await.map_err(|e| ResolveError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  Ok(bytes.to_vec())
}

fn local_path(url: &str) -> Option<PathBuf> {
  if let Some(rest) = url.strip_prefix("file://") {
    return Some(PathBuf::from(rest));
  }
  if url.contains("://") {
    return None;
  }
  Some(PathBuf::from(url))
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
pub(crate) fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit(['/', '\\']).next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &hash_bytes(url.as_bytes()).0[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn subject() -> Subject {
    Subject::Dependency("jemalloc".to_string())
  }

  #[test]
  fn url_to_filename_simple() {
    assert_eq!(url_to_filename("https://example.com/file.tar.gz"), "file.tar.gz");
  }

  #[test]
  fn url_to_filename_with_query() {
    assert_eq!(
      url_to_filename("https://example.com/file.tar.gz?token=abc"),
      "file.tar.gz"
    );
  }

  #[test]
  fn url_to_filename_fallback_for_empty() {
    assert!(url_to_filename("https://example.com/").starts_with("download_"));
  }

  #[test]
  fn url_to_filename_release_asset() {
    assert_eq!(
      url_to_filename("https://github.com/jemalloc/jemalloc/releases/download/5.3.0/jemalloc-5.3.0.tar.bz2"),
      "jemalloc-5.3.0.tar.bz2"
    );
  }

  #[test]
  fn local_path_detection() {
    assert_eq!(local_path("file:///tmp/a.tar.gz"), Some(PathBuf::from("/tmp/a.tar.gz")));
    assert_eq!(local_path("/tmp/a.tar.gz"), Some(PathBuf::from("/tmp/a.tar.gz")));
    assert_eq!(local_path("https://example.com/a.tar.gz"), None);
  }

  #[tokio::test]
  async fn http_download_is_verified_and_cached() {
    let body = b"archive bytes".to_vec();
    let sha = hash_bytes(&body).0;

    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/jemalloc.tar.gz")
      .with_status(200)
      .with_body(body.clone())
      .expect(1)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/jemalloc.tar.gz", server.url());

    let first = fetch_archive(&url, &sha, temp.path(), &subject()).await.unwrap();
    let second = fetch_archive(&url, &sha, temp.path(), &subject()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&first).unwrap(), body);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn http_error_status_is_fetch_failure() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/missing.tar.gz").with_status(404).create_async().await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/missing.tar.gz", server.url());
    let result = fetch_archive(&url, &"0".repeat(64), temp.path(), &subject()).await;

    assert!(matches!(result, Err(ResolveError::FetchFailed { message, .. }) if message.contains("404")));
  }

  #[tokio::test]
  async fn mismatch_is_rejected_and_not_written() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("jemalloc.tar.gz");
    std::fs::write(&source, b"tampered").unwrap();
    let downloads = temp.path().join("downloads");

    let expected = hash_bytes(b"original").0;
    let result = fetch_archive(source.to_str().unwrap(), &expected, &downloads, &subject()).await;

    match result {
      Err(ResolveError::ChecksumMismatch {
        expected: e, actual, ..
      }) => {
        assert_eq!(e, expected);
        assert_eq!(actual, hash_bytes(b"tampered").0);
      }
      other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert!(!downloads.join("jemalloc.tar.gz").exists());
  }

  #[tokio::test]
  async fn stale_cache_is_replaced() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src.tar.gz");
    std::fs::write(&source, b"good").unwrap();
    let downloads = temp.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    std::fs::write(downloads.join("src.tar.gz"), b"stale").unwrap();

    let url = format!("file://{}", source.display());
    let path = fetch_archive(&url, &hash_bytes(b"good").0, &downloads, &subject())
      .await
      .unwrap();

    assert_eq!(std::fs::read(path).unwrap(), b"good");
  }

  #[tokio::test]
  async fn missing_local_file_is_fetch_failure() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("absent.tar.gz");
    let result = fetch_archive(missing.to_str().unwrap(), &"0".repeat(64), temp.path(), &subject()).await;
    assert!(matches!(result, Err(ResolveError::FetchFailed { .. })));
  }
}
