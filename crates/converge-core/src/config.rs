//! Engine configuration loaded from TOML.
//!
//! Every table and field is optional:
//!
//! ```toml
//! [convergence]
//! required_clean_passes = 3
//! max_iterations = 10
//!
//! [batch]
//! per_task_timeout_ms = 300000
//!
//! [learning]
//! store_dir = ".converge/learning"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::convergence::ConvergencePolicy;
use crate::parallel::BatchConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Where learned patterns are persisted. No directory means in-memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub convergence: ConvergencePolicy,
    pub batch: BatchConfig,
    pub learning: LearningConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.convergence
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.batch.per_task_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "batch.per_task_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
