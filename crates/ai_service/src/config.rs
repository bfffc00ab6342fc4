//! Service configuration
//!
//! Read from a TOML file when one is given, then overridden by `EXO_SERVICE_*`
//! environment variables. Validated before the bundle is touched.

use crate::errors::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_ARTIFACT_DIR: &str = "EXO_SERVICE_ARTIFACT_DIR";
pub const ENV_INCLUDE_META: &str = "EXO_SERVICE_INCLUDE_META";
pub const ENV_MAX_BATCH_SIZE: &str = "EXO_SERVICE_MAX_BATCH_SIZE";

/// Inference service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the artifact bundle
    pub artifact_dir: PathBuf,
    /// Attach the meta-feature breakdown when a request does not say
    pub include_meta: bool,
    /// Largest number of rows accepted in one batch
    pub max_batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models/ensemble"),
            include_meta: false,
            max_batch_size: 10_000,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ServiceError::Config(format!("Failed to parse config file: {e}")))
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_ARTIFACT_DIR) {
            self.artifact_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_INCLUDE_META) {
            self.include_meta = parse_bool(&value).ok_or_else(|| {
                ServiceError::Config(format!("{ENV_INCLUDE_META}={value} is not a boolean"))
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_BATCH_SIZE) {
            self.max_batch_size = value.trim().parse().map_err(|e| {
                ServiceError::Config(format!("{ENV_MAX_BATCH_SIZE}={value}: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifact_dir.as_os_str().is_empty() {
            return Err(ServiceError::Config("artifact_dir must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ServiceError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("y")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("n")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}
