//! Command-line interface for wyoming-whisper-bridge
//!
//! Provides argument parsing using clap derive macros. Flags override the
//! configuration file and environment.

use crate::config::Config;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Wyoming speech-to-text server backed by a Whisper HTTP API
#[derive(Parser, Debug)]
#[command(
    name = "wyoming-whisper-bridge",
    version = crate::version_string(),
    about = "Wyoming speech-to-text server backed by a Whisper HTTP API"
)]
pub struct Cli {
    /// whisper.cpp server URL, or "openai" to use the OpenAI API
    #[arg(long, value_name = "URL")]
    pub api: Option<String>,

    /// Listen address, unix:///path/to.sock or tcp://host:port
    #[arg(long, value_name = "URI")]
    pub uri: Option<String>,

    /// OpenAI API key (required with --api openai)
    #[arg(long, env = "OPENAI_API_KEY", value_name = "KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI model to use (default: whisper-1)
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub openai_model: Option<String>,

    /// Default language code (default: auto-detect). Examples: auto, en, de, fr
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// Default prompt passed to Whisper, e.g. names or domain vocabulary
    #[arg(short, long, value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Default sampling temperature between 0 and 1
    #[arg(short, long, value_name = "TEMP")]
    pub temperature: Option<f32>,

    /// Log debug messages
    #[arg(short, long)]
    pub debug: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Full)]
    pub log_format: LogFormat,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Full,
    Compact,
    Pretty,
}

impl Cli {
    /// Overlay the flags that were given on top of `config`.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(api) = &self.api {
            config.backend.api = api.clone();
        }
        if let Some(uri) = &self.uri {
            config.server.uri = uri.clone();
        }
        if let Some(key) = self.openai_api_key.as_ref().filter(|k| !k.is_empty()) {
            config.backend.api_key = Some(key.clone());
        }
        if let Some(model) = &self.openai_model {
            config.backend.model = model.clone();
        }
        if let Some(language) = &self.language {
            config.transcription.language = language.clone();
        }
        if let Some(prompt) = &self.prompt {
            config.transcription.prompt = Some(prompt.clone());
        }
        if let Some(temperature) = self.temperature {
            config.transcription.temperature = temperature;
        }
        config
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}
