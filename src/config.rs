//! Configuration loading and runtime settings.
//!
//! `config.toml` lives in the Colloquy home directory (`$COLLOQUY_HOME`, else
//! `~/.colloquy`). Every key is optional; missing keys keep their defaults.
//!
//! **Model** (precedence):
//!   1. `--model` on the command line
//!   2. `COLLOQUY_MODEL` environment variable
//!   3. `model` in config.toml
//!   4. default: `llama3.2:1b`
//!
//! The base URL resolves the same way (`--base-url`, `COLLOQUY_BASE_URL`,
//! `base_url`, then a local Ollama server).

use crate::{ColloquyConfig, ColloquyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default model, matching a small local Ollama install
pub const DEFAULT_MODEL: &str = "llama3.2:1b";

/// Ollama's OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Recent turns sent with every prompt
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Turns between summary checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 20;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ─── Backend ────────────────────────────────────────────────────────

/// Connection settings for the chat-completions backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding a bearer token; local servers need none
    pub api_key_env: Option<String>,
    pub request_timeout: Duration,
    /// Transport attempts per call (1 = no retry)
    pub max_attempts: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: 1,
            temperature: 0.8,
            max_tokens: 512,
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

/// When a missed summary checkpoint gets another chance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Fire only when the turn count lands on a multiple of the interval
    #[default]
    Boundary,
    /// Fire whenever the un-summarized backlog reaches the interval
    CatchUp,
}

impl FromStr for CheckpointPolicy {
    type Err = ColloquyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "boundary" => Ok(Self::Boundary),
            "catch_up" | "catchup" => Ok(Self::CatchUp),
            other => Err(ColloquyError::Config(format!(
                "unknown checkpoint policy: {other}"
            ))),
        }
    }
}

/// Tuning for turn generation and memory compaction
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of recent turns rendered into each prompt
    pub context_window: usize,
    /// Turns per summary checkpoint
    pub checkpoint_interval: usize,
    pub checkpoint_policy: CheckpointPolicy,
    /// Ask the backend who should speak before falling back to round-robin
    pub assisted_scheduling: bool,
    /// Upper bound on a single generation call
    pub generation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            checkpoint_policy: CheckpointPolicy::Boundary,
            assisted_scheduling: false,
            generation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

// ─── Settings ───────────────────────────────────────────────────────

/// User-facing toggles read on every turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Pick the next speaker automatically when none is given
    pub auto_speaker_selection: bool,
    /// Keep parsed reactions on committed turns
    pub show_reactions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_speaker_selection: true,
            show_reactions: true,
        }
    }
}

/// Names accepted by `Settings::set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    AutoSpeakerSelection,
    ShowReactions,
}

impl FromStr for SettingKey {
    type Err = ColloquyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto_response" | "auto_speaker_selection" | "auto" => Ok(Self::AutoSpeakerSelection),
            "show_reactions" | "reactions" => Ok(Self::ShowReactions),
            other => Err(ColloquyError::UnknownSetting(other.to_string())),
        }
    }
}

impl Settings {
    pub fn set(&mut self, key: SettingKey, value: bool) {
        match key {
            SettingKey::AutoSpeakerSelection => self.auto_speaker_selection = value,
            SettingKey::ShowReactions => self.show_reactions = value,
        }
    }

    /// Toggle a setting by its user-facing name
    pub fn set_by_name(&mut self, name: &str, value: bool) -> Result<SettingKey> {
        let key = name.parse::<SettingKey>()?;
        self.set(key, value);
        Ok(key)
    }
}

// ─── config.toml ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    model: Option<String>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    request_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    sessions_dir: Option<PathBuf>,
    #[serde(default)]
    engine: EngineToml,
    #[serde(default)]
    settings: SettingsToml,
}

#[derive(Debug, Default, Deserialize)]
struct EngineToml {
    context_window: Option<usize>,
    checkpoint_interval: Option<usize>,
    checkpoint_policy: Option<String>,
    assisted_scheduling: Option<bool>,
    generation_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsToml {
    auto_speaker_selection: Option<bool>,
    show_reactions: Option<bool>,
}

/// Resolve the Colloquy home directory
pub fn colloquy_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("COLLOQUY_HOME") {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| ColloquyError::Config("could not find home directory".to_string()))?;
    Ok(home.join(".colloquy"))
}

/// Load configuration from `config_path` (or `<home>/config.toml`), then
/// apply environment overrides.
pub async fn load_config(home: &Path, config_path: Option<&Path>) -> Result<ColloquyConfig> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| home.join("config.toml"));

    let parsed = if path.exists() {
        let content = tokio::fs::read_to_string(&path).await?;
        debug!("Loaded config from {:?}", path);
        parse_config_toml(&content)?
    } else {
        debug!("No config file at {:?}, using defaults", path);
        ConfigToml::default()
    };

    let mut config = apply_config_toml(ColloquyConfig::new(home.to_path_buf()), parsed)?;

    if let Ok(model) = std::env::var("COLLOQUY_MODEL") {
        config.backend.model = model;
    }
    if let Ok(base_url) = std::env::var("COLLOQUY_BASE_URL") {
        config.backend.base_url = base_url;
    }

    config.validate()?;
    info!(
        "Config: model={}, base_url={}, window={}, checkpoint_interval={}",
        config.backend.model,
        config.backend.base_url,
        config.engine.context_window,
        config.engine.checkpoint_interval
    );
    Ok(config)
}

fn parse_config_toml(content: &str) -> Result<ConfigToml> {
    Ok(toml::from_str(content)?)
}

fn apply_config_toml(mut config: ColloquyConfig, parsed: ConfigToml) -> Result<ColloquyConfig> {
    if let Some(model) = parsed.model {
        config.backend.model = model;
    }
    if let Some(base_url) = parsed.base_url {
        config.backend.base_url = base_url;
    }
    if parsed.api_key_env.is_some() {
        config.backend.api_key_env = parsed.api_key_env;
    }
    if let Some(secs) = parsed.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
    if let Some(attempts) = parsed.max_attempts {
        config.backend.max_attempts = attempts;
    }
    if let Some(temperature) = parsed.temperature {
        config.backend.temperature = temperature;
    }
    if let Some(max_tokens) = parsed.max_tokens {
        config.backend.max_tokens = max_tokens;
    }
    if let Some(dir) = parsed.sessions_dir {
        config.sessions_dir = dir;
    }

    let engine = parsed.engine;
    if let Some(window) = engine.context_window {
        config.engine.context_window = window;
    }
    if let Some(interval) = engine.checkpoint_interval {
        config.engine.checkpoint_interval = interval;
    }
    if let Some(policy) = engine.checkpoint_policy {
        config.engine.checkpoint_policy = policy.parse()?;
    }
    if let Some(assisted) = engine.assisted_scheduling {
        config.engine.assisted_scheduling = assisted;
    }
    if let Some(secs) = engine.generation_timeout_secs {
        config.engine.generation_timeout = Duration::from_secs(secs);
    }

    if let Some(auto) = parsed.settings.auto_speaker_selection {
        config.settings.auto_speaker_selection = auto;
    }
    if let Some(show) = parsed.settings.show_reactions {
        config.settings.show_reactions = show;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let content = r#"
model = "mistral:7b"
base_url = "http://gpu-box:11434/v1"
max_attempts = 3
sessions_dir = "/var/lib/colloquy"

[engine]
context_window = 6
checkpoint_interval = 12
checkpoint_policy = "catch_up"
assisted_scheduling = true

[settings]
show_reactions = false
"#;
        let parsed = parse_config_toml(content).unwrap();
        let config = apply_config_toml(ColloquyConfig::new(PathBuf::from("/h")), parsed).unwrap();

        assert_eq!(config.backend.model, "mistral:7b");
        assert_eq!(config.backend.base_url, "http://gpu-box:11434/v1");
        assert_eq!(config.backend.max_attempts, 3);
        assert_eq!(config.sessions_dir, PathBuf::from("/var/lib/colloquy"));
        assert_eq!(config.engine.context_window, 6);
        assert_eq!(config.engine.checkpoint_interval, 12);
        assert_eq!(config.engine.checkpoint_policy, CheckpointPolicy::CatchUp);
        assert!(config.engine.assisted_scheduling);
        assert!(config.settings.auto_speaker_selection);
        assert!(!config.settings.show_reactions);
    }

    #[test]
    fn test_bad_policy_is_config_error() {
        let parsed = parse_config_toml("[engine]\ncheckpoint_policy = \"sometimes\"\n").unwrap();
        let result = apply_config_toml(ColloquyConfig::new(PathBuf::from("/h")), parsed);
        assert!(matches!(result, Err(ColloquyError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(temp_dir.path(), None).await.unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.sessions_dir, temp_dir.path().join("sessions"));
    }

    #[test]
    fn test_setting_names() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.set_by_name("auto_response", false).unwrap(),
            SettingKey::AutoSpeakerSelection
        );
        assert!(!settings.auto_speaker_selection);

        settings.set_by_name("show_reactions", false).unwrap();
        assert!(!settings.show_reactions);

        assert!(matches!(
            settings.set_by_name("dark_mode", true),
            Err(ColloquyError::UnknownSetting(_))
        ));
    }
}
