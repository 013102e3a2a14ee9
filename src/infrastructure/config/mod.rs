//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub extensions: ExtensionsConfig,
    pub admins: AdminsConfig,
    pub adapters: AdaptersConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "swapbot".to_string(),
            prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtensionsConfig {
    /// Root of the extension tree
    pub directory: PathBuf,
    /// Library file suffix, platform default when unset
    pub suffix: Option<String>,
    /// Where libraries are copied before being opened
    pub shadow_directory: Option<PathBuf>,
    /// Per-item limit for lifecycle operations, none when unset
    pub operation_timeout_secs: Option<u64>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("extensions"),
            suffix: None,
            shadow_directory: None,
            operation_timeout_secs: None,
        }
    }
}

impl ExtensionsConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

/// Users allowed to run administrator commands
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdminsConfig {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdaptersConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelegramConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    /// Plain-text log file, disabled when unset
    pub file: Option<PathBuf>,
    /// Filter used when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("bot.log")),
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise, then apply the environment
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `BOT_TOKEN` and `BOT_PREFIX` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.adapters.telegram.token = Some(token);
        }

        if let Some(prefix) = lookup("BOT_PREFIX").filter(|p| !p.trim().is_empty()) {
            self.bot.prefix = prefix;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue("bot.prefix must not be empty".to_string()));
        }
        if self.extensions.operation_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "extensions.operation-timeout-secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Platform token, required to connect
    pub fn token(&self) -> Result<String, ConfigError> {
        self.adapters
            .telegram
            .token
            .clone()
            .ok_or_else(|| ConfigError::MissingField("BOT_TOKEN".to_string()))
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.users.iter().any(|u| u == user_id)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}
