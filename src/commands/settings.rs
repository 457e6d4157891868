//! Assistant settings: credentials and the user profile.
//!
//! Persisted to `config.json` in the app data directory. Orchestration only
//! ever reads a snapshot; the mutators here are the single write path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_core::Credentials;

/// Environment fallback for an unset model credential.
pub const MODEL_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment fallback for an unset search credential.
pub const SEARCH_KEY_ENV: &str = "SERPAPI_API_KEY";

/// Errors reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// User-editable settings exposed to the front-end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    pub api_key: String,
    pub serp_api_key: String,
    pub user_description: String,
}

impl AssistantSettings {
    /// Load from disk or return defaults.
    pub fn load_or_default() -> Self {
        let path = Self::persist_path();
        match Self::load_from(&path) {
            Ok(settings) => {
                tracing::info!(path = %path.display(), "loaded settings");
                settings
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to the data directory (atomic write).
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::persist_path())
    }

    /// Write to `path` via a temp file and rename.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source: std::io::Error| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).map_err(io_err)?;
        std::fs::rename(&tmp_path, path).map_err(io_err)?;
        tracing::debug!(path = %path.display(), "saved settings");
        Ok(())
    }

    /// Load the stored settings, apply `edit` and save them back.
    pub fn update(edit: impl FnOnce(&mut Self)) -> Result<Self, SettingsError> {
        Self::update_at(&Self::persist_path(), edit)
    }

    /// Read-modify-write of the file at `path`. An unreadable or unparsable
    /// file is an error and is left untouched.
    pub fn update_at(path: &Path, edit: impl FnOnce(&mut Self)) -> Result<Self, SettingsError> {
        let mut settings = Self::load_from(path)?;
        edit(&mut settings);
        settings.save_to(path)?;
        Ok(settings)
    }

    fn persist_path() -> PathBuf {
        crate::data_dir().join("config.json")
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Model credential, falling back to `GEMINI_API_KEY`.
    pub fn api_key(&self) -> String {
        or_env(&self.api_key, std::env::var(MODEL_KEY_ENV).ok())
    }

    /// Search credential, falling back to `SERPAPI_API_KEY`.
    pub fn serp_api_key(&self) -> String {
        or_env(&self.serp_api_key, std::env::var(SEARCH_KEY_ENV).ok())
    }

    pub fn user_description(&self) -> &str {
        &self.user_description
    }

    pub fn set_api_key(&mut self, value: impl Into<String>) {
        self.api_key = value.into().trim().to_string();
        tracing::info!(set = !self.api_key.is_empty(), "model credential updated");
    }

    pub fn set_serp_api_key(&mut self, value: impl Into<String>) {
        self.serp_api_key = value.into().trim().to_string();
        tracing::info!(set = !self.serp_api_key.is_empty(), "search credential updated");
    }

    pub fn set_user_description(&mut self, value: impl Into<String>) {
        self.user_description = value.into();
        tracing::info!(chars = self.user_description.chars().count(), "user description updated");
    }

    /// Credential snapshot for one turn.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            model_api_key: self.api_key(),
            search_api_key: self.serp_api_key(),
        }
    }
}

/// Stored value, or the environment fallback when the stored value is blank.
fn or_env(stored: &str, fallback: Option<String>) -> String {
    if !stored.trim().is_empty() {
        return stored.to_string();
    }
    fallback
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}
