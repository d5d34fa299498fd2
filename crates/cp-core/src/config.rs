use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides `service.base_url`.
pub const BASE_URL_ENV: &str = "COMMAND_POST_URL";

/// Top-level configuration loaded from `~/.command-post/config.toml`.
///
/// Credentials for third-party integrations are never stored here; the
/// remote service owns those.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `~/.command-post/config.toml`, falling back to
    /// defaults when the file does not exist. `COMMAND_POST_URL` is applied
    /// on top of whatever was loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            Self::parse_file(&path)?
        } else {
            Config::default()
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path. `COMMAND_POST_URL` still wins over the file.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut cfg = Self::parse_file(&path.into())?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.terminal.validate()?;
        if self.assistant.binary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "assistant.binary must not be empty".into(),
            ));
        }
        if self.context.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "context.timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn parse_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!(%url, "base url overridden from environment");
                self.service.base_url = url;
            }
        }
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".command-post")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// Remote service address and the call contract applied to every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt budget for ordinary calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Per-attempt budget for calls that wait on the generative backend.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base unit of the linear backoff between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "service.base_url must be an absolute http(s) URL, got {url:?}"
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "service.max_attempts must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 || self.generation_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "service timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_generation_timeout_ms() -> u64 {
    90_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}

/// The interactive shell hosted by the process session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Explicit interpreter; when unset one is chosen for the host OS.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_term")]
    pub term: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            working_dir: None,
            cols: default_cols(),
            rows: default_rows(),
            term: default_term(),
        }
    }
}

impl TerminalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::Validation(format!(
                "terminal geometry must be non-zero, got {}x{}",
                self.cols, self.rows
            )));
        }
        Ok(())
    }

    /// The directory the shell starts in.
    pub fn resolved_working_dir(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    30
}
fn default_term() -> String {
    "xterm-256color".into()
}

/// How the coding assistant is invoked inside the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_binary")]
    pub binary: String,
    #[serde(default = "default_context_flag")]
    pub context_flag: String,
    #[serde(default = "default_banner")]
    pub banner: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            binary: default_assistant_binary(),
            context_flag: default_context_flag(),
            banner: default_banner(),
        }
    }
}

fn default_assistant_binary() -> String {
    "claude".into()
}
fn default_context_flag() -> String {
    "--context".into()
}
fn default_banner() -> String {
    "Starting Claude Code with task context...".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Location of the JSON key/value file; defaults under the OS config dir.
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join("command-post")
                .join("storage.json"),
        }
    }
}

/// External helper that describes what the desktop currently shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub helper: Option<String>,
    #[serde(default)]
    pub helper_args: Vec<String>,
    #[serde(default = "default_context_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            helper: None,
            helper_args: Vec::new(),
            timeout_ms: default_context_timeout_ms(),
        }
    }
}

fn default_context_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
