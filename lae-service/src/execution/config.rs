// Engine Configuration
// Worker count, fatigue multipliers and lifecycle switches for the engine

use crate::scheduling::random_fatigue_factors;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the engine and its worker pool
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of workers
    pub workers: usize,
    /// Explicit per-worker fatigue multipliers (length must equal `workers`)
    pub fatigue_factors: Option<Vec<f64>>,
    /// Seed for randomly drawn multipliers
    pub seed: Option<u64>,
    /// Shut the pool down when `run` finishes
    pub shutdown_after_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fatigue_factors: None,
            seed: None,
            shutdown_after_run: true,
        }
    }
}

impl EngineConfig {
    /// Config with a fixed worker count and defaults elsewhere
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Load from a YAML (or JSON) file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default location of the user config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lae").join("config.yaml"))
    }

    /// Load the user config file if one exists, otherwise defaults
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading engine config");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }
        if let Some(factors) = &self.fatigue_factors {
            if factors.len() != self.workers {
                return Err(ConfigError::Invalid(format!(
                    "{} fatigue factors given for {} workers",
                    factors.len(),
                    self.workers
                )));
            }
        }
        Ok(())
    }

    /// Multipliers to start the pool with
    pub fn resolve_fatigue_factors(&self) -> Vec<f64> {
        match &self.fatigue_factors {
            Some(factors) => factors.clone(),
            None => random_fatigue_factors(self.workers, self.seed),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
