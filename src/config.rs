use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub alias: &'static str,
    pub name: &'static str,
    pub model_type: &'static str,
    pub size: &'static str,
    pub description: &'static str,
}

/// Suggested embedding models
pub static SUGGESTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        alias: "lite",
        name: "lite",
        model_type: "lite",
        size: "0MB",
        description: "N-gram hashing - in-process, always available",
    },
    ModelInfo {
        alias: "minilm",
        name: "sentence-transformers/all-MiniLM-L6-v2",
        model_type: "sentence-transformers",
        size: "~90MB",
        description: "Fast general-purpose embeddings",
    },
    ModelInfo {
        alias: "bge-small",
        name: "BAAI/bge-small-en-v1.5",
        model_type: "sentence-transformers",
        size: "~130MB",
        description: "Small BGE model, good quality",
    },
    ModelInfo {
        alias: "bge-base",
        name: "BAAI/bge-base-en-v1.5",
        model_type: "sentence-transformers",
        size: "~400MB",
        description: "Good balance of quality and speed",
    },
];

pub const DEFAULT_MODEL: &str = "lite";

pub const CONFIG_FILE: &str = "_config.yaml";

const ENV_MEMORY_DIR: &str = "MEMVAULT_MEMORY_DIR";
const ENV_BACKUP_INTERVAL: &str = "MEMVAULT_BACKUP_INTERVAL_HOURS";
const ENV_EMBEDDING_MODEL: &str = "MEMVAULT_EMBEDDING_MODEL";

/// Get model aliases lookup
pub fn model_aliases() -> HashMap<&'static str, &'static ModelInfo> {
    SUGGESTED_MODELS.iter().map(|m| (m.alias, m)).collect()
}

/// Resolve a model input to (model_name, model_type)
pub fn resolve_model(model_input: &str) -> (String, String) {
    let aliases = model_aliases();

    if let Some(info) = aliases.get(model_input) {
        return (info.name.to_string(), info.model_type.to_string());
    }

    // Anything else is assumed to be served by the embedding server
    (model_input.to_string(), "sentence-transformers".to_string())
}

fn default_base_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("memvault").join("memory"))
        .unwrap_or_else(|| PathBuf::from("runtime").join("memory"))
}

fn default_backup_interval_hours() -> f64 {
    24.0
}

fn default_max_backups() -> usize {
    5
}

fn default_compression_level() -> u32 {
    3
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Settings for a memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the table, index and backups
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Hours between background backups; zero or less disables the loop
    #[serde(default = "default_backup_interval_hours")]
    pub backup_interval_hours: f64,

    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// zlib level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Model alias or name, see `SUGGESTED_MODELS`
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            backup_interval_hours: default_backup_interval_hours(),
            max_backups: default_max_backups(),
            compression_level: default_compression_level(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl MemoryConfig {
    /// Config rooted at a specific directory, everything else default
    pub fn at(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Load a YAML config file; a missing file yields defaults
    pub fn load(path: &Path) -> MemoryResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| MemoryError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from file, then apply environment overrides
    pub fn from_env(path: &Path) -> MemoryResult<Self> {
        let mut config = Self::load(path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> MemoryResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            serde_yaml::to_string(self).map_err(|e| MemoryError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Override settings from `MEMVAULT_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_MEMORY_DIR) {
            if !dir.is_empty() {
                self.base_path = PathBuf::from(dir);
            }
        }

        if let Ok(hours) = std::env::var(ENV_BACKUP_INTERVAL) {
            match hours.parse::<f64>() {
                Ok(h) => self.backup_interval_hours = h,
                Err(_) => tracing::warn!(value = %hours, "ignoring unparsable {}", ENV_BACKUP_INTERVAL),
            }
        }

        if let Ok(model) = std::env::var(ENV_EMBEDDING_MODEL) {
            if !model.is_empty() {
                self.embedding_model = model;
            }
        }
    }

    pub fn get_resolved_model(&self) -> (String, String) {
        resolve_model(&self.embedding_model)
    }

    /// Background backup period, `None` when disabled or out of range
    pub fn backup_interval(&self) -> Option<std::time::Duration> {
        if self.backup_interval_hours.is_nan() || self.backup_interval_hours <= 0.0 {
            return None;
        }

        match std::time::Duration::try_from_secs_f64(self.backup_interval_hours * 3600.0) {
            Ok(interval) if !interval.is_zero() => Some(interval),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    hours = self.backup_interval_hours,
                    error = %e,
                    "backup interval out of range, background backups disabled"
                );
                None
            }
        }
    }

    /// Backups to keep; at least one, so a quarantined table is never pruned on sight
    pub fn backup_retention(&self) -> usize {
        if self.max_backups == 0 {
            tracing::warn!("max_backups is 0, keeping 1 backup");
        }
        self.max_backups.max(1)
    }
}
