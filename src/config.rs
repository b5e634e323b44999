//! Bridge configuration loading.
//!
//! Reads `bridge.yaml` and resolves environment variables, so API keys can
//! live in the environment rather than in the file. The resulting
//! [`BridgeConfig`] is passed explicitly to everything that needs it; there
//! is no global settings lookup.
//!
//! ```yaml
//! server:
//!   port: 6274
//! stt:
//!   api_key: ${OPENAI_API_KEY}
//!   lookahead_lines: 2
//! audio_llm:
//!   provider: gemini
//!   api_key: ${GEMINI_API_KEY:-}
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "bridge.yaml";

/// Env var holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "SUBBRIDGE_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerSettings,
    pub project: ProjectSettings,
    pub stt: SttSettings,
    pub audio_llm: LlmSettings,
}

/// Where the RPC transport listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6274,
        }
    }
}

/// Which project file to open at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// SQLite project path. Defaults to `project.db` in the data directory.
    pub path: Option<String>,
}

/// Which engine turns a line's audio into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttBackend {
    /// OpenAI-compatible `/audio/transcriptions` endpoint.
    #[default]
    Whisper,
    /// The multimodal LLM configured under `audio_llm`.
    AudioLlm,
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    pub enabled: bool,
    pub backend: SttBackend,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// ISO language code, or `Auto` to let the provider detect it.
    pub language: String,
    /// Optional vocabulary/context hint sent with every request.
    pub prompt: String,
    /// Lines after the requested one to transcribe in the background.
    pub lookahead_lines: usize,
    /// Lines longer than this are not sent to the provider.
    pub max_duration_ms: i64,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: SttBackend::Whisper,
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "whisper-1".into(),
            language: "Auto".into(),
            prompt: String::new(),
            lookahead_lines: 0,
            max_duration_ms: 60_000,
        }
    }
}

impl SttSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.base_url.is_empty()
    }

    /// Language to send, or `None` for provider auto-detection.
    pub fn language_hint(&self) -> Option<&str> {
        normalize_language(&self.language)
    }
}

/// Multimodal LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `gemini` or `openai`.
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Optional outbound proxy URL.
    pub http_proxy: String,
    /// Longest audio range accepted by `audio_llm.call`.
    pub max_audio_ms: i64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: String::new(),
            model: "gemini-2.0-flash".into(),
            http_proxy: String::new(),
            max_audio_ms: 300_000,
        }
    }
}

impl LlmSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.base_url.is_empty()
    }
}

/// `""` and `Auto` (any case) mean "let the provider decide".
pub fn normalize_language(language: &str) -> Option<&str> {
    let trimmed = language.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(trimmed)
    }
}

/// Mask a secret for display: keep the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return String::new();
    }
    if count <= 4 {
        return "****".into();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `SUBBRIDGE_CONFIG` first, then searches upward from `start` for
/// `bridge.yaml`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "SUBBRIDGE_CONFIG points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on `${VAR}` and
/// `${VAR:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse config text (after env interpolation).
pub fn parse_config(raw: &str) -> Result<BridgeConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Invalid {
        reason: format!("failed to parse config: {e}"),
    })
}

/// Find and load the config, falling back to defaults when no file exists.
///
/// Returns the path actually loaded, if any, alongside the config.
pub fn load_or_default() -> Result<(BridgeConfig, Option<PathBuf>), ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_default();
    match find_config_path(&cwd) {
        Some(path) => load_config(&path).map(|cfg| (cfg, Some(path))),
        None => Ok((BridgeConfig::default(), None)),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset variables without a default
/// become empty strings.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
