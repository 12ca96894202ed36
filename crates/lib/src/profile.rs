//! Cargo build profiles the pipeline can package.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
  #[default]
  Release,
  Dev,
}

impl Profile {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Release => "release",
      Self::Dev => "dev",
    }
  }

  /// Directory under the target dir that holds this profile's outputs.
  pub fn dir_name(&self) -> &'static str {
    match self {
      Self::Release => "release",
      Self::Dev => "debug",
    }
  }

  /// Extra cargo arguments selecting the profile.
  pub fn cargo_args(&self) -> &'static [&'static str] {
    match self {
      Self::Release => &["--release"],
      Self::Dev => &[],
    }
  }
}

impl fmt::Display for Profile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile `{0}` (expected `release` or `dev`)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
  type Err = UnknownProfile;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "release" => Ok(Self::Release),
      "dev" | "debug" => Ok(Self::Dev),
      other => Err(UnknownProfile(other.to_string())),
    }
  }
}
