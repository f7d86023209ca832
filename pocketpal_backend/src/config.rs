use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_REPLY_DELAY_MS: u64 = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // OpenAI-compatible endpoint (proxy base, a /v1 base, or a full completions URL)
    #[serde(default)]
    pub llm_api_url: Option<String>,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    // How long the contact "reads" before replying; new input restarts the wait.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default = "default_segment_spacing_ms")]
    pub segment_spacing_ms: i64,

    #[serde(default = "default_weather_api_url")]
    pub weather_api_url: String,
    #[serde(default = "default_transcribe_api_url")]
    pub transcribe_api_url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_llm_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("pocketpal").join("pocketpal.db"))
        .unwrap_or_else(|| PathBuf::from("pocketpal.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_reply_delay_ms() -> u64 {
    DEFAULT_REPLY_DELAY_MS
}

fn default_segment_spacing_ms() -> i64 {
    500
}

fn default_weather_api_url() -> String {
    "https://wttr.in".to_string()
}

fn default_transcribe_api_url() -> String {
    "http://localhost:3000/api/transcribe".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: None,
            llm_api_key: None,
            llm_model: default_llm_model(),
            database_path: default_database_path(),
            reply_delay_ms: default_reply_delay_ms(),
            segment_spacing_ms: default_segment_spacing_ms(),
            weather_api_url: default_weather_api_url(),
            transcribe_api_url: default_transcribe_api_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Everything the streaming client needs for one request, resolved at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSettings {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl CompletionSettings {
    pub fn new(api_url: Option<&str>, api_key: Option<&str>, model: Option<&str>) -> Self {
        Self {
            api_url: non_blank(api_url),
            api_key: non_blank(api_key),
            model: non_blank(model).unwrap_or_else(default_llm_model),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Config file next to the executable
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("pocketpal_config.toml")
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pocketpal").join("config.toml"))
    }

    /// Load config from pocketpal_config.toml (next to executable), then the
    /// per-user config dir, then defaults + env vars. Env vars always win.
    pub fn load() -> Self {
        let candidates = std::iter::once(Self::config_path()).chain(Self::user_config_path());

        for path in candidates {
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.apply_env();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {:#}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str::<AppConfig>(contents).context("Invalid pocketpal config")
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Self {
        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = Some(url);
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            if !model.trim().is_empty() {
                self.llm_model = model;
            }
        }

        if let Ok(path) = env::var("POCKETPAL_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Ok(delay) = env::var("POCKETPAL_REPLY_DELAY_MS") {
            if let Ok(ms) = delay.trim().parse() {
                self.reply_delay_ms = ms;
            }
        }

        self
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings::new(
            self.llm_api_url.as_deref(),
            self.llm_api_key.as_deref(),
            Some(&self.llm_model),
        )
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
