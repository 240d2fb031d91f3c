use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating system variants a configuration pass can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Os {
  Linux,
  MacOs,
  Windows,
  FreeBsd,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    std::env::consts::OS.parse().ok()
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
      Self::FreeBsd => "freebsd",
    }
  }

  pub fn is_unix(&self) -> bool {
    !matches!(self, Self::Windows)
  }

  /// File name of a static archive for library `name` on this OS.
  pub fn static_archive_name(&self, name: &str) -> String {
    match self {
      Self::Windows => format!("{name}.lib"),
      _ => format!("lib{name}.a"),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported platform identifier: {0}")]
pub struct UnknownOs(pub String);

impl FromStr for Os {
  type Err = UnknownOs;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "linux" => Ok(Self::Linux),
      "macos" | "darwin" | "apple" => Ok(Self::MacOs),
      "windows" | "win32" => Ok(Self::Windows),
      "freebsd" => Ok(Self::FreeBsd),
      _ => Err(UnknownOs(s.to_string())),
    }
  }
}

impl TryFrom<String> for Os {
  type Error = UnknownOs;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Os> for String {
  fn from(os: Os) -> Self {
    os.as_str().to_string()
  }
}
