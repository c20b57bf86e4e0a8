use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::DEFAULT_REPO_PREFIX;

/// Main configuration structure for worldsync
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding one subdirectory per world
    pub saves_directory: String,

    /// Bindings file location, defaults to `bindings.json` next to the config file
    #[serde(default)]
    pub bindings_file: Option<String>,

    /// GitHub endpoints and naming
    #[serde(default)]
    pub github: GitHubConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event log configuration
    #[serde(default)]
    pub state: StateConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// REST API root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Root that `owner/name.git` is appended to for clone and push
    #[serde(default = "default_git_base_url")]
    pub git_base_url: String,

    /// Prefix of every backup repository name
    #[serde(default = "default_repo_prefix")]
    pub repo_prefix: String,

    /// Environment variable that overrides the stored token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// The single branch that is pushed and pulled
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Maximum parallel background pulls
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Attempts when deleting version-control metadata
    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,

    /// Initial backoff between delete attempts, doubled after each failure
    #[serde(default = "default_delete_backoff_ms")]
    pub delete_backoff_ms: u64,

    /// Commit author name
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Commit author email
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

/// Event log configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    /// Record status messages in SQLite
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database location, defaults to the XDG data directory
    #[serde(default)]
    pub db_path: Option<String>,

    /// Acknowledged events older than this many days are pruned, 0 keeps them all
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

// Default value functions
fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_git_base_url() -> String {
    "https://github.com".to_string()
}
fn default_repo_prefix() -> String {
    DEFAULT_REPO_PREFIX.to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_max_parallel() -> usize {
    4
}
fn default_delete_attempts() -> u32 {
    5
}
fn default_delete_backoff_ms() -> u64 {
    100
}
fn default_author_name() -> String {
    "Minecraft World Syncer".to_string()
}
fn default_author_email() -> String {
    "worldsync@localhost".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_retention_days() -> u32 {
    30
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            git_base_url: default_git_base_url(),
            repo_prefix: default_repo_prefix(),
            token_env: default_token_env(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            max_parallel: default_max_parallel(),
            delete_attempts: default_delete_attempts(),
            delete_backoff_ms: default_delete_backoff_ms(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            db_path: None,
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Relative defaults resolve next to the file that was loaded
        if config.bindings_file.is_none() {
            if let Some(parent) = path.parent() {
                config.bindings_file = Some(parent.join("bindings.json").to_string_lossy().into_owned());
            }
        }

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("worldsync").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.saves_directory = shellexpand::full(&self.saves_directory)
            .context("Failed to expand saves_directory path")?
            .into_owned();

        if let Some(bindings_file) = &self.bindings_file {
            self.bindings_file = Some(
                shellexpand::full(bindings_file)
                    .context("Failed to expand bindings_file path")?
                    .into_owned(),
            );
        }

        if let Some(db_path) = &self.state.db_path {
            self.state.db_path = Some(
                shellexpand::full(db_path)
                    .context("Failed to expand state.db_path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    pub fn saves_path(&self) -> PathBuf {
        PathBuf::from(&self.saves_directory)
    }

    /// Resolved bindings file path
    pub fn bindings_path(&self) -> Result<PathBuf> {
        match &self.bindings_file {
            Some(path) => Ok(PathBuf::from(path)),
            None => {
                let config_path = Self::default_config_path()?;
                let dir = config_path
                    .parent()
                    .context("Config path has no parent directory")?;
                Ok(dir.join("bindings.json"))
            }
        }
    }

    /// Token from the configured environment variable, if set and non-empty
    pub fn token_from_env(&self) -> Option<String> {
        std::env::var(&self.github.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn delete_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.delete_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            saves_directory: "${HOME}/.minecraft/saves".to_string(),
            bindings_file: None,
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            state: StateConfig::default(),
        }
    }
}
