use likeness_core::ArtifactPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MIB: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: optional TOML file, then environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detector, classifier and scaler locations.
    pub artifacts: ArtifactPaths,
    /// Socket address the HTTP server binds to.
    pub listen: String,
    /// Number of engine threads, each with its own detector session.
    pub workers: usize,
    /// Largest accepted image upload, per file.
    pub max_upload_bytes: usize,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifacts: ArtifactPaths::default(),
            listen: "0.0.0.0:5000".to_string(),
            workers: 2,
            max_upload_bytes: 15 * MIB,
            max_body_bytes: 16 * MIB,
        }
    }
}

impl Config {
    /// Load configuration from `LIKENESS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Read the TOML file named by `LIKENESS_CONFIG` when set, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("LIKENESS_CONFIG") {
            Ok(path) => Ok(Self::from_file(Path::new(&path))?.with_env()),
            Err(_) => Ok(Self::from_env()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn with_env(self) -> Self {
        Self {
            artifacts: self.artifacts.with_env(),
            listen: std::env::var("LIKENESS_LISTEN").unwrap_or(self.listen),
            workers: env_usize("LIKENESS_WORKERS", self.workers).max(1),
            max_upload_bytes: env_usize("LIKENESS_MAX_UPLOAD_BYTES", self.max_upload_bytes),
            max_body_bytes: env_usize("LIKENESS_MAX_BODY_BYTES", self.max_body_bytes),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
