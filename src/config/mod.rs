//! Configuration (layered: code > env > defaults).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEE_FILE: &str = "stream.sse";
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Runtime configuration for threadrun.
///
/// Resolution order:
/// 1. Values set in code (`with_*` builders)
/// 2. Environment variables (a `.env` file is loaded first when present)
/// 3. Built-in defaults
#[derive(Clone)]
pub struct ThreadrunConfig {
    api_key: Option<String>,
    pub base_url: String,
    pub app_dir: PathBuf,
    /// Where raw event-stream bytes are mirrored. `None` disables the tee.
    pub tee_path: Option<PathBuf>,
    pub tool_timeout: Option<Duration>,
    pub stream_idle_timeout: Option<Duration>,
}

impl fmt::Debug for ThreadrunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadrunConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("app_dir", &self.app_dir)
            .field("tee_path", &self.tee_path)
            .field("tool_timeout", &self.tool_timeout)
            .field("stream_idle_timeout", &self.stream_idle_timeout)
            .finish()
    }
}

impl Default for ThreadrunConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            app_dir: default_app_dir(),
            tee_path: Some(PathBuf::from(DEFAULT_TEE_FILE)),
            tool_timeout: Some(DEFAULT_TOOL_TIMEOUT),
            stream_idle_timeout: Some(DEFAULT_STREAM_IDLE_TIMEOUT),
        }
    }
}

impl ThreadrunConfig {
    /// Load from environment variables (OPENAI_API_KEY, OPENAI_BASE_URL, THREADRUN_*).
    pub fn from_env() -> Result<Self, RunError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunError> {
        let mut config = Self::default();

        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            config.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|u| !u.is_empty()) {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("THREADRUN_HOME").filter(|d| !d.is_empty()) {
            config.app_dir = PathBuf::from(dir);
        }
        if let Some(tee) = lookup("THREADRUN_TEE") {
            config.tee_path = if tee.is_empty() {
                None
            } else {
                Some(PathBuf::from(tee))
            };
        }
        if let Some(secs) = lookup("THREADRUN_TOOL_TIMEOUT_SECS") {
            config.tool_timeout = parse_timeout("THREADRUN_TOOL_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("THREADRUN_STREAM_IDLE_TIMEOUT_SECS") {
            config.stream_idle_timeout =
                parse_timeout("THREADRUN_STREAM_IDLE_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_dir = dir.into();
        self
    }

    pub fn with_tee_path(mut self, path: Option<PathBuf>) -> Self {
        self.tee_path = path;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Resolve the API key, failing when none is configured.
    pub fn api_key(&self) -> Result<&str, RunError> {
        self.api_key.as_deref().ok_or_else(|| {
            RunError::Configuration("OPENAI_API_KEY is not set".to_string())
        })
    }

    /// Path of the persisted state file.
    pub fn state_path(&self) -> PathBuf {
        self.app_dir.join("state.toml")
    }
}

/// `0` disables the timeout.
fn parse_timeout(var: &str, raw: &str) -> Result<Option<Duration>, RunError> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| RunError::Configuration(format!("{var} must be whole seconds, got {raw:?}")))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn default_app_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".threadrun"))
        .unwrap_or_else(|| PathBuf::from(".threadrun"))
}
