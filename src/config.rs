//! # Application Configuration
//!
//! TOML-backed settings for the server: bind address, CORS origins,
//! session quotas/TTL, reaper cadence, and beamline presets for the XAS
//! workflow. Every field has a default matching the built-in constants,
//! so an empty (or absent) config file yields a working setup.

use std::collections::HashMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::session::{self, SessionLimits};
use crate::xas::store::BeamlineConfig;

/// Errors raised while loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML syntax or type error
    #[error("Failed to parse config: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP bind address
    pub bind_address: String,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    /// Session quota and lifetime settings
    pub session: SessionConfig,
    /// Beamline presets, keyed by name. "BM23" is always present.
    pub beamlines: HashMap<String, BeamlineConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut beamlines = HashMap::new();
        beamlines.insert("BM23".to_string(), BeamlineConfig::bm23());
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
            cors_origins: Vec::new(),
            session: SessionConfig::default(),
            beamlines,
        }
    }
}

/// Session quotas and lifetimes, mirroring [`crate::session`] constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum datasets per session
    pub max_files: usize,
    /// Maximum single-file size in MiB
    pub max_file_size_mb: f64,
    /// Maximum aggregate dataset memory per session in MiB
    pub max_memory_mb: f64,
    /// Idle lifetime before expiry, in hours
    pub ttl_hours: i64,
    /// Reaper cadence, in minutes
    pub cleanup_interval_min: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_files: session::MAX_FILES_PER_SESSION,
            max_file_size_mb: session::MAX_FILE_SIZE_MB,
            max_memory_mb: session::MAX_MEMORY_PER_SESSION_MB,
            ttl_hours: session::SESSION_TTL_HOURS,
            cleanup_interval_min: session::CLEANUP_INTERVAL_MIN,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; unspecified fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&text)?;
        config.beamlines.entry("BM23".to_string()).or_insert_with(BeamlineConfig::bm23);
        Ok(config)
    }

    /// The session limits derived from this config.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_files: self.session.max_files,
            max_file_size_mb: self.session.max_file_size_mb,
            max_memory_mb: self.session.max_memory_mb,
            ttl: Duration::hours(self.session.ttl_hours),
        }
    }

    /// A beamline preset by name.
    pub fn beamline(&self, name: &str) -> Option<&BeamlineConfig> {
        self.beamlines.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_constants() {
        let config = AppConfig::default();
        assert_eq!(config.session.max_files, 100);
        assert_eq!(config.session.ttl_hours, 24);
        assert_eq!(config.session.cleanup_interval_min, 30);
        assert!(config.beamline("BM23").is_some());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(tmp, "bind_address = \"0.0.0.0:9000\"\n\n[session]\nmax_files = 7").unwrap();
        let config = AppConfig::from_file(tmp.path()).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.session.max_files, 7);
        assert_eq!(config.session.max_file_size_mb, 50.0);
        assert!(config.beamline("BM23").is_some());
    }

    #[test]
    fn custom_beamline_accepted() {
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            tmp,
            "[beamlines.TEST]\nparent_path = \"measurement\"\n\n[beamlines.TEST.h5_paths]\nenergy = \"mono_energy\""
        )
        .unwrap();
        let config = AppConfig::from_file(tmp.path()).unwrap();
        let test = config.beamline("TEST").unwrap();
        assert_eq!(test.parent_path, "measurement");
        assert_eq!(test.path_of("energy"), Some("mono_energy"));
        // The built-in preset is still there.
        assert!(config.beamline("BM23").is_some());
    }
}
