//! Assistant configuration loading.
//!
//! Reads an optional `nexus.yaml` and resolves environment variables. Every
//! field has a default, so a missing file (or a partial one) yields a working
//! configuration pointed at the hosted Gemini endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "NEXUS_CONFIG";

/// File name looked up in the data directory when no explicit path is set.
pub const CONFIG_FILE_NAME: &str = "nexus.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `nexus.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub tools: ToolLimits,
    #[serde(default)]
    pub orchestration: OrchestrationLimits,
}

/// Where and how to reach the hosted model.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for buffered `generateContent` calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for the whole streamed response.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

/// Per-tool bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolLimits {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_screenshot_width")]
    pub screenshot_width: u32,
    #[serde(default = "default_screenshot_height")]
    pub screenshot_height: u32,
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,
}

/// Bounds on a single user turn.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationLimits {
    /// How many trailing history turns are kept before repair.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Retries after the first attempt for overload/rate-limit failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_stream_timeout_secs() -> u64 {
    180
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_search_timeout_ms() -> u64 {
    8_000
}
fn default_screenshot_width() -> u32 {
    1280
}
fn default_screenshot_height() -> u32 {
    720
}
fn default_search_base_url() -> String {
    "https://serpapi.com/search.json".into()
}
fn default_history_window() -> usize {
    6
}
fn default_max_tool_rounds() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            screenshot_width: default_screenshot_width(),
            screenshot_height: default_screenshot_height(),
            search_base_url: default_search_base_url(),
        }
    }
}

impl ToolLimits {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl Default for OrchestrationLimits {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_tool_rounds: default_max_tool_rounds(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `NEXUS_CONFIG` wins when set; otherwise `nexus.yaml` in the data directory.
/// Returns `None` when neither exists.
pub fn find_config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} points to a missing file");
    }

    let candidate = crate::data_dir().join(CONFIG_FILE_NAME);
    candidate.exists().then_some(candidate)
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_config(path: &Path) -> Result<AssistantConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse configuration YAML after env-var interpolation.
pub fn parse_config(raw: &str) -> Result<AssistantConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AssistantConfig::default());
    }

    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse config: {e}"),
    })
}

/// Load the config file if one exists, falling back to defaults.
///
/// A present but unreadable file is logged and ignored rather than aborting
/// startup.
pub fn load_or_default() -> AssistantConfig {
    let Some(path) = find_config_path() else {
        return AssistantConfig::default();
    };
    match load_config(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), model = %config.provider.model, "loaded assistant config");
            config
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load assistant config, using defaults");
            AssistantConfig::default()
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let var_expr: String = chars.by_ref().take_while(|c| *c != '}').collect();
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset or empty variables use the default.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hosted_provider() {
        let config = AssistantConfig::default();
        assert_eq!(config.provider.model, "gemini-2.5-flash");
        assert_eq!(config.tools.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.tools.search_timeout(), Duration::from_secs(8));
        assert_eq!(config.orchestration.history_window, 6);
        assert_eq!(config.orchestration.max_tool_rounds, 3);
        assert_eq!(config.orchestration.max_retries, 3);
        assert_eq!(config.orchestration.backoff_base_ms, 500);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = parse_config(
            r#"
            orchestration:
              max_tool_rounds: 5
            tools:
              command_timeout_ms: 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestration.max_tool_rounds, 5);
        assert_eq!(config.orchestration.history_window, 6);
        assert_eq!(config.tools.command_timeout_ms, 2500);
        assert_eq!(config.tools.search_timeout_ms, 8000);
        assert_eq!(config.provider.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config.tools.screenshot_width, 1280);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = parse_config("provider: [unterminated").unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }

    #[test]
    fn test_interpolated_model_name() {
        std::env::set_var("__NEXUS_TEST_MODEL__", "gemini-2.5-pro");
        let config = parse_config("provider:\n  model: ${__NEXUS_TEST_MODEL__:-gemini-2.5-flash}\n").unwrap();
        assert_eq!(config.provider.model, "gemini-2.5-pro");
        std::env::remove_var("__NEXUS_TEST_MODEL__");
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__NEXUS_TEST_NONEXISTENT__");
        let result = interpolate_env_vars("${__NEXUS_TEST_NONEXISTENT__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
    }
}
