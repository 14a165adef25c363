use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const SETTINGS_FILE: &str = "inkwell.yml";

/// User-facing configuration, persisted as camelCase JSON under
/// `inkwell-config`. Fields missing from a saved record take their defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_ui_language")]
    pub ui_language: String,

    #[serde(default)]
    pub theme: Theme,

    #[serde(default)]
    pub use_backend_server: bool,

    #[serde(default = "default_backend_url")]
    pub backend_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            ui_language: default_ui_language(),
            theme: Theme::default(),
            use_backend_server: false,
            backend_url: default_backend_url(),
        }
    }
}

impl StoryConfig {
    /// Copy safe to write into exported files.
    pub fn without_api_key(&self) -> Self {
        Self {
            api_key: String::new(),
            ..self.clone()
        }
    }
}

/// Local settings for the command-line front end, read from `inkwell.yml`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_data_folder")]
    pub data_folder: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub unattended: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            port: default_port(),
            unattended: false,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: Settings = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)
            .with_context(|| format!("Failed to create {}", self.data_folder))?;
        Ok(())
    }
}

/// Shared backend configuration. The key never leaves the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| default_base_url()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| default_model()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_port),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_ui_language() -> String {
    "en".to_string()
}
fn default_backend_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_data_folder() -> String {
    ".inkwell".to_string()
}
fn default_port() -> u16 {
    3001
}
