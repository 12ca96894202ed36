use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating systems the pipeline knows the shared-library naming of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// File name prefix the compiler puts in front of dynamic libraries.
  pub fn dylib_prefix(&self) -> &'static str {
    match self {
      Self::Linux | Self::MacOs => "lib",
      Self::Windows => "",
    }
  }

  /// Native dynamic library extension, without the dot.
  pub fn dylib_extension(&self) -> &'static str {
    match self {
      Self::Linux => "so",
      Self::MacOs => "dylib",
      Self::Windows => "dll",
    }
  }

  /// Environment variable the dynamic loader searches at run time.
  pub fn loader_path_var(&self) -> &'static str {
    match self {
      Self::Linux => "LD_LIBRARY_PATH",
      Self::MacOs => "DYLD_LIBRARY_PATH",
      Self::Windows => "PATH",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
