use crate::error::{AppError, Result};
use crate::translator::DEFAULT_SUPPRESSED_INPUT_TOOLS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// Secondary OpenAI-compatible endpoint for the orchestrator fallback.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FallbackProvider {
    pub api_base: String,
    pub api_key_env: String,
    pub model: String,
}

impl Default for FallbackProvider {
    fn default() -> Self {
        FallbackProvider {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub openai_api_key: Option<String>, // Falls back to OPENAI_API_KEY.
    pub decision_model: String,
    pub fallback: Option<FallbackProvider>,
    pub narrator_model: String,
    pub sub_agent_model: String,
    pub recorder_model: String,
    pub image_model: String,
    pub max_pre_step_rounds: usize,
    pub max_narrator_steps: usize,
    pub decision_history_window: usize,
    pub suppressed_input_tools: Vec<String>,
    pub data_dir: Option<PathBuf>,
    pub debug_mode: bool, // Full error detail in client error events.
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            openai_api_key: None,
            decision_model: "gpt-4o".to_string(),
            fallback: Some(FallbackProvider::default()),
            narrator_model: "gpt-4o".to_string(),
            sub_agent_model: "gpt-4o-mini".to_string(),
            recorder_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            max_pre_step_rounds: 5,
            max_narrator_steps: 6,
            decision_history_window: 12,
            suppressed_input_tools: DEFAULT_SUPPRESSED_INPUT_TOOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            data_dir: None,
            debug_mode: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// `~/taleweaver/data` unless overridden.
    pub fn default_data_dir() -> Result<PathBuf> {
        dir::home_dir()
            .map(|home| home.join("taleweaver").join("data"))
            .ok_or_else(|| {
                AppError::IO(io::Error::new(
                    io::ErrorKind::NotFound,
                    "could not determine the home directory",
                ))
            })
    }

    /// Settings from `<data_dir>/settings.json`, defaults when the file is missing.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("settings.json");
        match Self::load_settings_from_file(&path) {
            Ok(settings) => Ok(settings),
            Err(AppError::IO(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        self.save_to_file(&data_dir.join("settings.json"))
    }

    pub fn load_settings_from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_data_dir(),
        }
    }

    pub fn api_key(&self) -> Result<String> {
        self.openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or(AppError::MissingApiKey)
    }

    /// Key of the fallback provider, if one is configured and its variable is set.
    pub fn fallback_key(&self) -> Option<String> {
        let fallback = self.fallback.as_ref()?;
        std::env::var(&fallback.api_key_env).ok()
    }
}
