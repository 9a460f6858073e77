//! Capability descriptor advertised in reply to `describe`.

use crate::config::BackendConfig;
use crate::defaults::{MODEL_VERSION, WHISPER_LANGUAGES};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrModel {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub languages: Vec<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrProgram {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub models: Vec<AsrModel>,
}

/// Wyoming `info` payload. Only the speech-to-text section is populated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub asr: Vec<AsrProgram>,
}

impl Info {
    /// Build the descriptor for the configured backend.
    ///
    /// Called once at startup; the result is shared read-only by every session.
    pub fn for_backend(backend: &BackendConfig) -> Self {
        let languages = WHISPER_LANGUAGES.iter().map(|l| l.to_string()).collect();

        let model = if backend.is_openai() {
            AsrModel {
                name: backend.model.clone(),
                description: Some(format!("OpenAI {}", backend.model)),
                attribution: Attribution {
                    name: "OpenAI".to_string(),
                    url: "https://platform.openai.com/docs/guides/speech-to-text".to_string(),
                },
                installed: true,
                languages,
                version: Some(MODEL_VERSION.to_string()),
            }
        } else {
            AsrModel {
                name: "whisper.cpp".to_string(),
                description: Some("whisper.cpp server".to_string()),
                attribution: Attribution {
                    name: "ggml-org".to_string(),
                    url: "https://github.com/ggml-org/whisper.cpp".to_string(),
                },
                installed: true,
                languages,
                version: Some(MODEL_VERSION.to_string()),
            }
        };

        Info {
            asr: vec![AsrProgram {
                name: "whisper-api".to_string(),
                description: Some("Whisper transcription via its HTTP API".to_string()),
                attribution: Attribution {
                    name: "wyoming-whisper-bridge".to_string(),
                    url: "https://github.com/rhasspy/wyoming".to_string(),
                },
                installed: true,
                version: Some(crate::version_string()),
                models: vec![model],
            }],
        }
    }
}
