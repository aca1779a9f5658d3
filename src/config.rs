//! User configuration (`config.toml`)
//!
//! ```toml
//! [api]
//! key = "sk-or-v1-..."
//! base_url = "https://openrouter.ai/api/v1"
//! default_model = "qwen/qwen3-coder:free"
//! timeout_secs = 60
//!
//! [preferences]
//! log_level = "warn"
//! max_history = 100
//! retention_days = 30
//! compression = "fast"
//!
//! [models]
//! coding = "qwen/qwen3-coder:free"
//! general = "z-ai/glm-4.5-air:free"
//! ```
//!
//! Every field has a default, so a partial file is valid. The
//! `OPENROUTER_API_KEY` environment variable takes precedence over `api.key`.

use crate::compression::CompressionStrategy;
use crate::error::{OrcliError, Result};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding `api.key`
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Prefix OpenRouter keys carry
pub const API_KEY_PREFIX: &str = "sk-or-v1-";

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "qwen/qwen3-coder:free";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// AI provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Behavior settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Default tracing level when neither `RUST_LOG` nor a flag is given
    pub log_level: String,
    /// History records kept per storage directory
    pub max_history: usize,
    /// Default age for `history cleanup`
    pub retention_days: u32,
    /// Storage directory override (relative paths resolve against the root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    /// Compression strategy for new backups
    pub compression: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            max_history: 100,
            retention_days: 30,
            storage_dir: None,
            compression: "fast".to_string(),
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub preferences: Preferences,
    /// Model id per role (`coding`, `general`, ...)
    pub models: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let models = [
            ("coding", "qwen/qwen3-coder:free"),
            ("general", "z-ai/glm-4.5-air:free"),
            ("reasoning", "deepseek/deepseek-r1-0528:free"),
            ("experimental", "openrouter/horizon-beta:free"),
        ]
        .into_iter()
        .map(|(role, model)| (role.to_string(), model.to_string()))
        .collect();

        Self {
            api: ApiConfig::default(),
            preferences: Preferences::default(),
            models,
        }
    }
}

/// Severity of a [`ConfigIssue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Warning,
    Error,
}

/// Problem reported by [`Config::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub level: IssueLevel,
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "{} [{}]: {}", level, self.key, self.message)
    }
}

impl Config {
    /// `<config dir>/orcli/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .map(|dir| dir.join("orcli").join("config.toml"))
            .ok_or_else(|| OrcliError::config("could not determine a configuration directory"))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!("Loaded configuration from {:?}", path);
                Ok(toml::from_str(&text)?)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        utils::atomic_write(path, text.as_bytes())
    }

    /// Create a fresh configuration file
    ///
    /// Refuses to replace an existing file unless `force` is set.
    pub fn init(path: &Path, api_key: Option<String>, force: bool) -> Result<Self> {
        if path.exists() && !force {
            return Err(OrcliError::validation(format!(
                "configuration already exists at {:?} (use --force to overwrite)",
                path
            )));
        }
        let mut config = Self::default();
        if let Some(key) = api_key {
            config.api.key = key;
        }
        config.save(path)?;
        info!("Wrote configuration to {:?}", path);
        Ok(config)
    }

    /// Replace the file at `path` with defaults
    pub fn reset(path: &Path) -> Result<Self> {
        Self::init(path, None, true)
    }

    /// API key, preferring the environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with(&self, env_key: Option<String>) -> Option<String> {
        env_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| Some(self.api.key.clone()).filter(|key| !key.trim().is_empty()))
    }

    /// Model for a role, falling back to `api.default_model`
    pub fn model_for(&self, role: &str) -> &str {
        self.models
            .get(role)
            .map(String::as_str)
            .unwrap_or(&self.api.default_model)
    }

    /// Compression strategy named by `preferences.compression`
    pub fn compression_strategy(&self) -> Result<CompressionStrategy> {
        self.preferences.compression.parse()
    }

    /// Read a value by dotted key (`api.base_url`)
    pub fn get(&self, key: &str) -> Result<Option<toml::Value>> {
        let tree = toml::Value::try_from(self)?;
        let mut current = &tree;
        for part in key.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    /// Set a value by dotted key
    ///
    /// The raw string is read as an integer, float or boolean when it parses
    /// as one, otherwise as a string. The result must still deserialize into
    /// a valid configuration, and the key must exist afterwards.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(OrcliError::validation("configuration key is empty"));
        };

        let typed = parse_value(raw);
        let updated = match self.with_value(parents, leaf, typed.clone()) {
            Ok(updated) => Ok(updated),
            // "12345" may well be meant as a string field
            Err(_) if !typed.is_str() => self.with_value(parents, leaf, toml::Value::String(raw.to_string())),
            Err(e) => Err(e),
        }
        .map_err(|e| OrcliError::validation(format!("invalid value for '{}': {}", key, e)))?;

        if updated.get(key)?.is_none() {
            return Err(OrcliError::validation(format!("unknown configuration key '{}'", key)));
        }

        *self = updated;
        Ok(())
    }

    fn with_value(&self, parents: &[&str], leaf: &str, value: toml::Value) -> Result<Config> {
        let mut tree = toml::Value::try_from(self)?;
        let mut table = tree
            .as_table_mut()
            .ok_or_else(|| OrcliError::internal("configuration is not a table"))?;
        for part in parents {
            table = table
                .entry(part.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()))
                .as_table_mut()
                .ok_or_else(|| OrcliError::validation(format!("'{}' is not a section", part)))?;
        }
        table.insert(leaf.to_string(), value);
        Ok(tree.try_into()?)
    }

    /// Copy with the API key masked, for display
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.api.key = mask_secret(&self.api.key);
        copy
    }

    /// Report problems without failing
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut push = |level, key: &str, message: String| {
            issues.push(ConfigIssue {
                level,
                key: key.to_string(),
                message,
            })
        };

        match self.api_key() {
            None => push(
                IssueLevel::Error,
                "api.key",
                format!("no API key configured (set api.key or {})", API_KEY_ENV),
            ),
            Some(key) if !key.starts_with(API_KEY_PREFIX) => push(
                IssueLevel::Warning,
                "api.key",
                format!("key does not start with '{}'", API_KEY_PREFIX),
            ),
            Some(_) => {}
        }

        match url::Url::parse(&self.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => push(
                IssueLevel::Error,
                "api.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ),
            Err(e) => push(IssueLevel::Error, "api.base_url", e.to_string()),
        }

        if self.api.default_model.trim().is_empty() {
            push(IssueLevel::Error, "api.default_model", "no default model".to_string());
        }
        if self.api.timeout_secs == 0 {
            push(IssueLevel::Error, "api.timeout_secs", "timeout must be positive".to_string());
        }
        if self.preferences.max_history == 0 {
            push(
                IssueLevel::Error,
                "preferences.max_history",
                "history must keep at least one record".to_string(),
            );
        }
        if !LOG_LEVELS.contains(&self.preferences.log_level.to_ascii_lowercase().as_str()) {
            push(
                IssueLevel::Warning,
                "preferences.log_level",
                format!("unknown level '{}'", self.preferences.log_level),
            );
        }
        if let Err(e) = self.compression_strategy() {
            push(IssueLevel::Error, "preferences.compression", e.to_string());
        }

        issues
    }
}

fn parse_value(raw: &str) -> toml::Value {
    if let Ok(int) = raw.parse::<i64>() {
        toml::Value::Integer(int)
    } else if let Ok(float) = raw.parse::<f64>() {
        toml::Value::Float(float)
    } else if let Ok(flag) = raw.parse::<bool>() {
        toml::Value::Boolean(flag)
    } else {
        toml::Value::String(raw.to_string())
    }
}

/// Keep the first 8 and last 4 characters of long secrets
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 12 => "*".repeat(n),
        n => {
            let head: String = chars[..8].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}
