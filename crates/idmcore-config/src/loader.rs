//! Configuration loader with multi-source merging

use crate::{IdmConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
    env_source: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "IDM".to_string(),
            include_user_config: true,
            env_source: None,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "IDM")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/idmcore/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Read environment variables from `vars` instead of the process
    /// environment
    pub fn with_env_source<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_source = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<IdmConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = IdmConfig::default();
        builder = builder.add_source(
            config::Config::try_from(&defaults).context("Failed to encode default configuration")?,
        );

        // 2. User config (~/.config/idmcore/config.toml)
        if self.include_user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Project config (idmcore.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (idmcore.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (IDM_*). Nesting uses a double underscore
        // so field names keep theirs: IDM_PAP__CACHE__TTL_SECS -> pap.cache.ttl_secs
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("entity_types")
                .source(self.env_source.clone()),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut idm_config: IdmConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        idm_config.resolve_paths(&self.project_dir);
        idm_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(idm_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> IdmConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
