//! Test utilities for depstrap-lib.
//!
//! Archive builders for fetch/extract tests and a [`RecordingRunner`] that
//! stands in for real subprocesses, counting phase invocations.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::process::{Invocation, Phase, PhaseRunner, ProcessOutcome};

/// Build an in-memory `.tar.gz` from `(path, contents)` pairs.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
  let encoder = GzEncoder::new(Vec::new(), Compression::default());
  let mut builder = tar::Builder::new(encoder);

  for (path, contents) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
  }

  builder.into_inner().unwrap().finish().unwrap()
}

/// Build an in-memory `.zip` from `(path, contents)` pairs.
pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
  let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
  for (path, contents) in files {
    writer
      .start_file(*path, zip::write::SimpleFileOptions::default())
      .unwrap();
    writer.write_all(contents.as_bytes()).unwrap();
  }
  writer.finish().unwrap().into_inner()
}

/// A [`PhaseRunner`] that records every invocation instead of spawning it.
///
/// Each phase succeeds unless configured with [`RecordingRunner::fail`];
/// [`RecordingRunner::creates`] makes a phase write files (relative paths are
/// resolved against the invocation's working directory), simulating the
/// byproducts a real tool would produce.
#[derive(Default)]
pub struct RecordingRunner {
  calls: Mutex<Vec<Invocation>>,
  exit_codes: BTreeMap<Phase, i32>,
  creates: BTreeMap<Phase, Vec<PathBuf>>,
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail(mut self, phase: Phase, code: i32) -> Self {
    self.exit_codes.insert(phase, code);
    self
  }

  pub fn creates(mut self, phase: Phase, paths: &[PathBuf]) -> Self {
    self.creates.entry(phase).or_default().extend(paths.iter().cloned());
    self
  }

  pub fn phases(&self) -> Vec<Phase> {
    self.calls.lock().unwrap().iter().map(|c| c.phase).collect()
  }

  pub fn count(&self, phase: Phase) -> usize {
    self.phases().into_iter().filter(|p| *p == phase).count()
  }

  pub fn invocations(&self) -> Vec<Invocation> {
    self.calls.lock().unwrap().clone()
  }
}

impl PhaseRunner for RecordingRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutcome> {
    self.calls.lock().unwrap().push(invocation.clone());

    let code = self.exit_codes.get(&invocation.phase).copied().unwrap_or(0);
    if code == 0 {
      for path in self.creates.get(&invocation.phase).into_iter().flatten() {
        let path = invocation.cwd.join(path);
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{} output\n", invocation.phase))?;
      }
    }

    Ok(ProcessOutcome {
      code: Some(code),
      ..Default::default()
    })
  }
}
