use std::path::PathBuf;

use crate::consts::{APP_NAME, STORE_ENV};

/// Returns the user's home directory, falling back to the system temp dir when unset.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory, falling back to the system temp dir when unset.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the artifact store. `PLUGPACK_STORE` wins over the cache directory.
pub fn store_dir() -> PathBuf {
  if let Some(path) = std::env::var_os(STORE_ENV) {
    return PathBuf::from(path);
  }

  cache_dir().join("store")
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_cache_home_takes_precedence() {
    temp_env::with_vars(
      [("XDG_CACHE_HOME", Some("/custom/cache")), ("HOME", Some("/home/user"))],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/custom/cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [("XDG_CACHE_HOME", None::<&str>), ("HOME", Some("/home/user"))],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn store_env_overrides_default() {
    temp_env::with_vars(
      [(STORE_ENV, Some("/custom/store")), ("XDG_CACHE_HOME", Some("/custom/cache"))],
      || {
        assert_eq!(store_dir(), PathBuf::from("/custom/store"));
      },
    );
  }

  #[test]
  #[serial]
  fn store_defaults_under_cache_dir() {
    temp_env::with_vars(
      [(STORE_ENV, None::<&str>), ("XDG_CACHE_HOME", Some("/custom/cache"))],
      || {
        assert_eq!(store_dir(), PathBuf::from("/custom/cache").join(APP_NAME).join("store"));
      },
    );
  }
}
