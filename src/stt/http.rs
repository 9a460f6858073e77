//! HTTP transcription backends: a whisper.cpp server or the OpenAI API.
//!
//! Both take the same multipart upload and answer with `{"text": "..."}`.
//! Which one is used is decided once from the configuration.

use crate::config::BackendConfig;
use crate::defaults::{AUTO_LANGUAGE, MAX_ERROR_BODY_LEN};
use crate::error::{BridgeError, Result};
use crate::stt::transcriber::{Transcriber, TranscriptionRequest};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Which transcription API to talk to.
#[derive(Clone, PartialEq)]
pub enum Backend {
    /// whisper.cpp `server` example, `POST {url}/inference`
    WhisperCpp { url: String },
    /// OpenAI-compatible `POST {base_url}/audio/transcriptions`
    OpenAi {
        base_url: String,
        api_key: String,
        model: String,
    },
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::WhisperCpp { url } => {
                f.debug_struct("WhisperCpp").field("url", url).finish()
            }
            Backend::OpenAi {
                base_url, model, ..
            } => f
                .debug_struct("OpenAi")
                .field("base_url", base_url)
                .field("api_key", &"<redacted>")
                .field("model", model)
                .finish(),
        }
    }
}

impl Backend {
    /// Select the backend from configuration.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        if config.is_openai() {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| BridgeError::ConfigInvalidValue {
                    key: "backend.api_key".to_string(),
                    message: "an API key is required for the openai backend".to_string(),
                })?;
            Ok(Backend::OpenAi {
                base_url: config.openai_base_url.trim().to_string(),
                api_key,
                model: config.model.clone(),
            })
        } else {
            Ok(Backend::WhisperCpp {
                url: config.api.trim().to_string(),
            })
        }
    }

    /// Endpoint the request is posted to.
    pub fn endpoint(&self) -> String {
        match self {
            Backend::WhisperCpp { url } => {
                let url = url.trim_end_matches('/');
                if url.ends_with("/inference") {
                    url.to_string()
                } else {
                    format!("{url}/inference")
                }
            }
            Backend::OpenAi { base_url, .. } => {
                format!("{}/audio/transcriptions", base_url.trim_end_matches('/'))
            }
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Backend::WhisperCpp { .. } => "whisper.cpp",
            Backend::OpenAi { model, .. } => model,
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcriber that uploads the session audio to an HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: Client,
    backend: Backend,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(backend: Backend, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            backend,
            timeout,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            Backend::from_config(config)?,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn build_form(&self, request: &TranscriptionRequest) -> Result<Form> {
        let wav = request.audio.to_wav()?;
        let file = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| BridgeError::Other(format!("Invalid upload content type: {e}")))?;

        let mut form = Form::new()
            .part("file", file)
            .text("temperature", request.temperature.to_string())
            .text("response_format", "json");

        match &self.backend {
            Backend::WhisperCpp { .. } => {
                // The server falls back to its own startup language when none is sent
                let language = request
                    .language
                    .clone()
                    .unwrap_or_else(|| AUTO_LANGUAGE.to_string());
                form = form.text("language", language);
            }
            Backend::OpenAi { model, .. } => {
                form = form.text("model", model.clone());
                if let Some(language) = &request.language {
                    form = form.text("language", language.clone());
                }
            }
        }

        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }

        Ok(form)
    }

    fn send_error(&self, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::BackendTimeout {
                timeout: self.timeout,
            }
        } else {
            BridgeError::BackendUnreachable {
                message: e.to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String> {
        let form = self.build_form(request)?;
        let endpoint = self.backend.endpoint();

        let mut builder = self.client.post(&endpoint).multipart(form);
        if let Backend::OpenAi { api_key, .. } = &self.backend {
            builder = builder.bearer_auth(api_key);
        }

        tracing::debug!(
            endpoint = %endpoint,
            bytes = request.audio.pcm.len(),
            language = request.language.as_deref().unwrap_or(AUTO_LANGUAGE),
            "Sending transcription request"
        );

        let response = builder.send().await.map_err(|e| self.send_error(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.send_error(e))?;

        if !status.is_success() {
            return Err(BridgeError::BackendRejected {
                status: status.as_u16(),
                body: cap_error_body(&body, status),
            });
        }

        let parsed: TranscriptionResponse =
            serde_json::from_slice(&body).map_err(|e| BridgeError::BackendProtocolError {
                message: format!("{e}"),
            })?;

        Ok(parsed.text.trim().to_string())
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

fn cap_error_body(body: &[u8], status: StatusCode) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }
    if text.chars().count() > MAX_ERROR_BODY_LEN {
        let capped: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{capped}... (truncated)")
    } else {
        text.to_string()
    }
}
