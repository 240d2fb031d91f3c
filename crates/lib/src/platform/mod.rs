pub mod arch;
pub mod os;

use std::fmt;
use std::path::{Path, PathBuf};

use arch::Arch;
use os::Os;

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Option<Arch>,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Option<Arch>, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current(),
      os: Os::current()?,
    })
  }

  /// Debian-style multiarch directory name (e.g. "x86_64-linux-gnu"), Linux only.
  pub fn multiarch(&self) -> Option<String> {
    match (self.os, self.arch) {
      (Os::Linux, Some(arch)) => Some(format!("{}-linux-gnu", arch)),
      _ => None,
    }
  }

  /// Library directories under an installation prefix, in search order.
  pub fn library_dirs(&self, prefix: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![prefix.join("lib"), prefix.join("lib64")];
    if let Some(multiarch) = self.multiarch() {
      dirs.push(prefix.join("lib").join(multiarch));
    }
    dirs
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.arch {
      Some(arch) => write!(f, "{}-{}", arch, self.os),
      None => write!(f, "{}", self.os),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_display_format() {
    let platform = Platform::new(Some(Arch::Aarch64), Os::MacOs);
    assert_eq!(platform.to_string(), "aarch64-darwin");

    let platform = Platform::new(None, Os::Linux);
    assert_eq!(platform.to_string(), "linux");
  }

  #[test]
  fn linux_library_dirs_include_multiarch() {
    let platform = Platform::new(Some(Arch::X86_64), Os::Linux);
    assert_eq!(
      platform.library_dirs(Path::new("/usr")),
      vec![
        PathBuf::from("/usr/lib"),
        PathBuf::from("/usr/lib64"),
        PathBuf::from("/usr/lib/x86_64-linux-gnu"),
      ]
    );
  }

  #[test]
  fn darwin_library_dirs_have_no_multiarch() {
    let platform = Platform::new(Some(Arch::Aarch64), Os::MacOs);
    assert_eq!(platform.library_dirs(Path::new("/opt/homebrew")).len(), 2);
  }
}
