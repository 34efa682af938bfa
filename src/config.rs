use anyhow::{Context, Result};
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::github::{DEFAULT_API_BASE, DEFAULT_GIST_BASE};

/// Main configuration structure for ghmirror
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub account and endpoints
    #[serde(default)]
    pub github: GitHubConfig,

    /// Outbound HTTP behaviour
    #[serde(default)]
    pub http: HttpConfig,

    /// Sync engine behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local mirror database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Push hook settings
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Account whose repositories are mirrored
    #[serde(default = "default_login")]
    pub login: String,

    /// API token (GITHUB_TOKEN is used when unset)
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_gist_base")]
    pub gist_base: String,

    /// Branch whose history is mirrored
    #[serde(default = "default_branch")]
    pub branch: String,
}

/// HTTP client configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Minimum milliseconds between the starts of two requests
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Identifying User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Also request blob content for directory entries of a tree
    #[serde(default = "default_true")]
    pub fetch_tree_content: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    /// Shared secret a push hook must present
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

// Default value functions
fn default_login() -> String {
    "coleifer".to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_gist_base() -> String {
    DEFAULT_GIST_BASE.to_string()
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_min_interval_ms() -> u64 {
    1150
}
fn default_timeout_secs() -> u64 {
    4
}
fn default_user_agent() -> String {
    format!("ghmirror/{}", env!("CARGO_PKG_VERSION"))
}
fn default_true() -> bool {
    true
}
fn default_data_dir() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ghmirror")
}
fn default_database_path() -> String {
    default_data_dir().join("mirror.db").to_string_lossy().into_owned()
}
fn default_log_level() -> String {
    "debug".to_string()
}
fn default_log_file() -> String {
    default_data_dir()
        .join("github_log.log")
        .to_string_lossy()
        .into_owned()
}
fn default_secret_key() -> String {
    "1337".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            login: default_login(),
            token: None,
            api_base: default_api_base(),
            gist_base: default_gist_base(),
            branch: default_branch(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_tree_content: default_true(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
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
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

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

        Ok(config_dir.join("ghmirror").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database.path = shellexpand::full(&self.database.path)
            .context("Failed to expand database path")?
            .into_owned();

        self.logging.file = shellexpand::full(&self.logging.file)
            .context("Failed to expand log file path")?
            .into_owned();

        Ok(())
    }
}
