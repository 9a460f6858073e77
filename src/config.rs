use crate::daemon::session::normalize_language;
use crate::defaults;
use crate::error::{BridgeError, Result};
use crate::ipc::server::ListenUri;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub transcription: TranscriptionConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `unix:///path/to.sock` or `tcp://host:port`
    pub uri: String,
    pub drain_timeout_secs: u64,
}

/// Transcription backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// whisper.cpp server URL, or `openai`
    pub api: String,
    pub api_key: Option<String>,
    pub model: String,
    pub openai_base_url: String,
    pub timeout_secs: u64,
}

/// Defaults applied to sessions that don't override them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub language: String,
    pub prompt: Option<String>,
    pub temperature: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: defaults::DEFAULT_URI.to_string(),
            drain_timeout_secs: defaults::DRAIN_TIMEOUT_SECS,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api: defaults::DEFAULT_API.to_string(),
            api_key: None,
            model: defaults::OPENAI_DEFAULT_MODEL.to_string(),
            openai_base_url: defaults::OPENAI_BASE_URL.to_string(),
            timeout_secs: defaults::BACKEND_TIMEOUT_SECS,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: defaults::AUTO_LANGUAGE.to_string(),
            prompt: None,
            temperature: defaults::DEFAULT_TEMPERATURE,
        }
    }
}

impl BackendConfig {
    /// True when the OpenAI API is selected instead of a whisper.cpp server.
    pub fn is_openai(&self) -> bool {
        self.api.trim().eq_ignore_ascii_case(defaults::OPENAI_API)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                BridgeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(BridgeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - OPENAI_API_KEY → backend.api_key
    /// - WHISPER_BRIDGE_API → backend.api
    /// - WHISPER_BRIDGE_MODEL → backend.model
    /// - WHISPER_BRIDGE_URI → server.uri
    /// - WHISPER_BRIDGE_LANGUAGE → transcription.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            self.backend.api_key = Some(key);
        }

        if let Ok(api) = std::env::var("WHISPER_BRIDGE_API")
            && !api.is_empty()
        {
            self.backend.api = api;
        }

        if let Ok(model) = std::env::var("WHISPER_BRIDGE_MODEL")
            && !model.is_empty()
        {
            self.backend.model = model;
        }

        if let Ok(uri) = std::env::var("WHISPER_BRIDGE_URI")
            && !uri.is_empty()
        {
            self.server.uri = uri;
        }

        if let Ok(language) = std::env::var("WHISPER_BRIDGE_LANGUAGE")
            && !language.is_empty()
        {
            self.transcription.language = language;
        }

        self
    }

    /// Check the values that would otherwise fail on the first session.
    ///
    /// Runs once at startup; a failure keeps the process from starting.
    pub fn validate(&self) -> Result<()> {
        ListenUri::parse(&self.server.uri)?;

        if self.backend.is_openai() {
            let has_key = self
                .backend
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty());
            if !has_key {
                return Err(BridgeError::ConfigInvalidValue {
                    key: "backend.api_key".to_string(),
                    message: "an API key is required for the openai backend".to_string(),
                });
            }
            if self.backend.model.trim().is_empty() {
                return Err(BridgeError::ConfigInvalidValue {
                    key: "backend.model".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            check_http_url("backend.openai_base_url", &self.backend.openai_base_url)?;
        } else {
            check_http_url("backend.api", &self.backend.api)?;
        }

        if self.backend.timeout_secs == 0 {
            return Err(BridgeError::ConfigInvalidValue {
                key: "backend.timeout_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }

        let temperature = self.transcription.temperature;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(BridgeError::ConfigInvalidValue {
                key: "transcription.temperature".to_string(),
                message: format!("{temperature} is outside 0.0..=1.0"),
            });
        }

        normalize_language(&self.transcription.language).map_err(|_| {
            BridgeError::ConfigInvalidValue {
                key: "transcription.language".to_string(),
                message: format!(
                    "'{}' is neither \"auto\" nor a supported language code",
                    self.transcription.language
                ),
            }
        })?;

        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wyoming-whisper-bridge/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wyoming-whisper-bridge").join("config.toml"))
    }
}

fn check_http_url(key: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(BridgeError::ConfigInvalidValue {
            key: key.to_string(),
            message: format!("expected an http:// or https:// URL or 'openai', got '{url}'"),
        })
    }
}
