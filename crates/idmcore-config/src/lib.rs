//! Configuration management for the IDM core
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (IDM_* prefix, highest precedence; nested keys
//!    joined by `__`, e.g. `IDM_PAP__CACHE__TTL_SECS`, lists comma separated)
//! 2. idmcore.local.toml (gitignored, local overrides)
//! 3. idmcore.toml (git-tracked, project config)
//! 4. ~/.config/idmcore/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! The policy document itself is JSON and lives in its own file, named by
//! `policy_file`.

use anyhow::{Context, Result};
use idmcore_abac::PolicyDocument;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main IDM core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdmConfig {
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub pap: PapConfig,
    /// JSON policy document. The built-in owner/admin policy is used when
    /// unset.
    pub policy_file: Option<PathBuf>,
    /// Accepted entity types, in declaration order.
    pub entity_types: Vec<String>,
    /// Structural schemas keyed by entity type without the leading `/`.
    pub schemas: BTreeMap<String, serde_json::Value>,
}

impl Default for IdmConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            storage: StorageConfig::default(),
            pap: PapConfig::default(),
            policy_file: None,
            entity_types: ["/any", "/group", "/user", "/sensor", "/client", "/api"]
                .into_iter()
                .map(String::from)
                .collect(),
            schemas: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "idmcore".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_name: "database_idm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PapConfig {
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 1024,
        }
    }
}

impl IdmConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(policy_file) = &self.policy_file {
            if policy_file.is_relative() {
                self.policy_file = Some(base.join(policy_file));
            }
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pap.cache.enabled && self.pap.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pap.cache.capacity must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if self.pap.cache.enabled && self.pap.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pap.cache.ttl_secs must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if let Some(bad) = self.entity_types.iter().find(|t| !t.starts_with('/')) {
            return Err(ConfigError::ValidationError(format!(
                "entity type '{bad}' must start with '/'"
            )));
        }
        for (entity_type, schema) in &self.schemas {
            if !schema.is_object() {
                return Err(ConfigError::ValidationError(format!(
                    "schema for '{entity_type}' must be a table"
                )));
            }
        }
        Ok(())
    }

    /// Loads the policy document named by `policy_file`, or the built-in
    /// owner/admin policy.
    pub fn load_policies(&self) -> Result<PolicyDocument> {
        match &self.policy_file {
            Some(path) => PolicyDocument::from_json_file(path)
                .map_err(|e| ConfigError::PolicyError {
                    path: path.clone(),
                    reason: e.to_string(),
                })
                .with_context(|| format!("Failed to load policies from {}", path.display())),
            None => Ok(PolicyDocument::standard()),
        }
    }
}
