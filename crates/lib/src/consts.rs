//! Crate-wide constants.

/// Application name, used for directory names under the platform data/cache roots.
pub const APP_NAME: &str = "plugpack";

/// Number of hex characters kept from a SHA-256 digest for store object names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Optional per-workspace configuration file.
pub const CONFIG_FILENAME: &str = "plugpack.toml";

/// Cargo's lock file name.
pub const CARGO_LOCK: &str = "Cargo.lock";

/// Cargo's manifest file name.
pub const CARGO_TOML: &str = "Cargo.toml";

/// Marker file written into a dependency artifact set right before it is published.
pub const COMPLETE_MARKER: &str = ".plugpack-complete";

/// Environment variable overriding the store location.
pub const STORE_ENV: &str = "PLUGPACK_STORE";

/// Environment variable overriding the cargo program.
pub const CARGO_ENV: &str = "PLUGPACK_CARGO";

/// `SOURCE_DATE_EPOCH` handed to every build (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
