//! Gateway configuration loaded from TOML.

use anyhow::{Context, Result};
use compact_str::CompactString;
use runtime::task::TaskConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config directory name under platform config dir.
pub const CONFIG_DIR: &str = "ferry";
/// Configuration file name inside the config directory.
pub const CONFIG_FILE: &str = "gateway.toml";
/// Transcript subdirectory.
pub const LOGS_DIR: &str = "logs";

/// Resolve the global configuration directory (`~/.config/ferry/` on unix).
pub fn global_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR))
        .context("no platform config directory")
}

/// Top-level gateway configuration.
///
/// Every section has defaults, so an empty file serves the echo model and
/// a task model built on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server bind configuration.
    pub server: ServerConfig,
    /// Built-in echo model.
    pub echo: EchoConfig,
    /// OpenAI-compatible upstream served as a chat model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectConfig>,
    /// App directory whose apps are served as models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps: Option<AppsConfig>,
    /// Multi-round task model.
    pub task: TaskModelConfig,
    /// Judge endpoint for the task model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_owned(),
        }
    }
}

/// Echo model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Whether the echo model is registered.
    pub enabled: bool,
    /// Model id.
    pub model: CompactString,
    /// Delay between chunks in milliseconds.
    pub delay_ms: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "echo-model".into(),
            delay_ms: 50,
        }
    }
}

/// Redirect model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Model id served by the gateway.
    #[serde(default = "default_redirect_model")]
    pub model: CompactString,
    /// Upstream base URL, e.g. `https://api.moonshot.cn/v1`.
    pub base_url: String,
    /// Upstream API key (supports `${ENV_VAR}` expansion).
    #[serde(default)]
    pub api_key: String,
    /// Model name sent upstream.
    pub upstream_model: String,
}

fn default_redirect_model() -> CompactString {
    "redirect-model".into()
}

/// App directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsConfig {
    /// Console URL used to list apps and provision keys.
    pub site_url: String,
    /// App API URL used for chat.
    pub base_url: String,
    /// Console account email.
    pub email: String,
    /// Console account password (supports `${ENV_VAR}` expansion).
    pub password: String,
    /// Owner tag of the registered models.
    #[serde(default = "default_apps_owner")]
    pub owner: CompactString,
    /// This gateway's `/v1` URL as reachable from the console. Enables
    /// `POST /v1/apps/models/activate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
}

fn default_apps_owner() -> CompactString {
    "apps".into()
}

/// Task model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskModelConfig {
    /// Whether the task model is registered.
    pub enabled: bool,
    /// Model id.
    pub model: CompactString,
    /// Loop settings.
    #[serde(flatten)]
    pub run: TaskConfig,
}

impl Default for TaskModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "run-task-model".into(),
            run: TaskConfig::default(),
        }
    }
}

/// Judge endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// API key (supports `${ENV_VAR}` expansion).
    #[serde(default)]
    pub api_key: String,
    /// Judge model name.
    pub model: String,
}

impl GatewayConfig {
    /// Parse a TOML string into a `GatewayConfig`, expanding environment
    /// variables first.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let expanded = crate::utils::expand_env_vars(toml_str);
        toml::from_str(&expanded).context("invalid gateway configuration")
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// The configured bind address.
    pub fn bind_address(&self) -> &str {
        &self.server.bind
    }

    /// The transcript directory, defaulting to `<config_dir>/logs`.
    pub fn log_dir(&self, config_dir: &Path) -> PathBuf {
        self.task
            .run
            .log_dir
            .clone()
            .unwrap_or_else(|| config_dir.join(LOGS_DIR))
    }
}

/// Scaffold the config directory on first run.
///
/// Creates the directory and its logs subdirectory and writes a default
/// gateway.toml.
pub fn scaffold_config_dir(config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir.join(LOGS_DIR))
        .context("failed to create logs directory")?;

    let gateway_toml = config_dir.join(CONFIG_FILE);
    let contents = toml::to_string_pretty(&GatewayConfig::default())
        .context("failed to serialize default config")?;
    std::fs::write(&gateway_toml, contents)
        .with_context(|| format!("failed to write {}", gateway_toml.display()))?;

    Ok(())
}
