//! Profiler configuration loaded from TOML files.
//!
//! ## Loading order
//!
//! 1. `DATASCOPE_CONFIG` environment variable (path to a TOML file)
//! 2. `datascope.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The configuration only supplies defaults for [`crate::ProfileOptions`];
//! callers embedding the profiler as a library can skip it entirely.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Default data-size budget for loading, in bytes (50 MB).
pub const DEFAULT_LOAD_MAX_SIZE: u64 = 50_000_000;

/// Seed shared by every per-call PRNG (sub-sampling, sample selection,
/// plot column choice), making results reproducible.
pub const RANDOM_SEED: u64 = 89;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DATASCOPE_CONFIG";

/// Environment variable carrying the deployed version string, used as the
/// User-Agent for outbound requests.
pub const VERSION_ENV_VAR: &str = "DATASCOPE_VERSION";

fn default_load_max_size() -> u64 {
    DEFAULT_LOAD_MAX_SIZE
}

/// Tunable profiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Target size of the data to analyze; bigger inputs are sub-sampled.
    pub load_max_size: u64,
    /// Base URL of the Nominatim geocoder, if address resolution is wanted.
    pub nominatim_url: Option<String>,
    /// Base URL of the sketch (Lazo) service.
    pub lazo_url: Option<String>,
    /// Directory holding the geo-reference CSV tables.
    pub geo_data_dir: Option<PathBuf>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            load_max_size: default_load_max_size(),
            nominatim_url: None,
            lazo_url: None,
            geo_data_dir: None,
        }
    }
}

impl ProfilerConfig {
    /// Load configuration using the documented lookup order.
    pub fn load() -> Result<Self, ProfileError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_path(Path::new(&path));
        }
        let local = Path::new("datascope.toml");
        if local.exists() {
            return Self::from_path(local);
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| ProfileError::Config(format!("{}: {e}", path.display())))
    }

    /// The version string sent as User-Agent for outbound requests.
    pub fn user_agent() -> String {
        std::env::var(VERSION_ENV_VAR)
            .unwrap_or_else(|_| format!("datascope/{}", env!("CARGO_PKG_VERSION")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert_eq!(config.load_max_size, 50_000_000);
        assert!(config.nominatim_url.is_none());
    }

    #[test]
    fn test_parse_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "load_max_size = 1000000\nnominatim_url = \"http://localhost:8080\""
        )
        .unwrap();
        let config = ProfilerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.load_max_size, 1_000_000);
        assert_eq!(
            config.nominatim_url.as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no_such_key = 1").unwrap();
        assert!(matches!(
            ProfilerConfig::from_path(file.path()),
            Err(ProfileError::Config(_))
        ));
    }
}
