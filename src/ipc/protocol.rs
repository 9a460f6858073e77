//! Wyoming events understood and produced by the bridge.
//!
//! [`RawEvent`] is the untyped frame (type, JSON data, optional payload) that
//! the codec reads and writes. [`Event`] is the typed view the session works
//! with. Conversion in either direction never touches the transport.

use crate::audio::AudioFormat;
use crate::error::{BridgeError, Result};
use crate::info::Info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEvent {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }
}

/// Session parameters carried by a `transcribe` event.
///
/// Every field is optional; missing ones fall back to the configured defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscribeParams {
    /// Requested model name. Logged only: the backend model is fixed at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Client asks for the capability descriptor
    Describe,
    /// Capability descriptor
    Info(Info),
    /// Session start with optional overrides
    Transcribe(TranscribeParams),
    /// Audio stream begins
    AudioStart(AudioFormat),
    /// Raw PCM
    AudioChunk { format: AudioFormat, audio: Vec<u8> },
    /// Audio stream ends; transcribe what was received
    AudioStop,
    /// Transcription result
    Transcript { text: String },
    /// Failure report
    Error { text: String, code: Option<String> },
    Ping { text: Option<String> },
    Pong { text: Option<String> },
}

#[derive(Serialize, Deserialize)]
struct TextData {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct OptionalTextData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorData {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl Event {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Describe => "describe",
            Event::Info(_) => "info",
            Event::Transcribe(_) => "transcribe",
            Event::AudioStart(_) => "audio-start",
            Event::AudioChunk { .. } => "audio-chunk",
            Event::AudioStop => "audio-stop",
            Event::Transcript { .. } => "transcript",
            Event::Error { .. } => "error",
            Event::Ping { .. } => "ping",
            Event::Pong { .. } => "pong",
        }
    }

    /// Error event reported to the client for `error`.
    pub fn from_error(error: &BridgeError) -> Self {
        Event::Error {
            text: error.client_message(),
            code: Some(error.code().to_string()),
        }
    }

    /// Interpret a raw frame.
    ///
    /// Unknown types and malformed data are protocol violations; the frame
    /// itself was fully consumed, so the stream stays usable.
    pub fn from_raw(raw: RawEvent) -> Result<Self> {
        let RawEvent {
            event_type,
            data,
            payload,
        } = raw;

        let event = match event_type.as_str() {
            "describe" => Event::Describe,
            "info" => Event::Info(parse_data(&event_type, data)?),
            "transcribe" => Event::Transcribe(parse_data(&event_type, data)?),
            "audio-start" => Event::AudioStart(parse_data(&event_type, data)?),
            "audio-chunk" => Event::AudioChunk {
                format: parse_data(&event_type, data)?,
                audio: payload.unwrap_or_default(),
            },
            "audio-stop" => Event::AudioStop,
            "transcript" => {
                let TextData { text } = parse_data(&event_type, data)?;
                Event::Transcript { text }
            }
            "error" => {
                let ErrorData { text, code } = parse_data(&event_type, data)?;
                Event::Error { text, code }
            }
            "ping" => {
                let OptionalTextData { text } = parse_data(&event_type, data)?;
                Event::Ping { text }
            }
            "pong" => {
                let OptionalTextData { text } = parse_data(&event_type, data)?;
                Event::Pong { text }
            }
            other => {
                return Err(BridgeError::violation(format!(
                    "unknown event type '{other}'"
                )));
            }
        };
        Ok(event)
    }

    /// Convert into a raw frame for the codec.
    pub fn into_raw(self) -> Result<RawEvent> {
        let mut raw = RawEvent::new(self.event_type());
        match self {
            Event::Describe | Event::AudioStop => {}
            Event::Info(info) => raw.data = to_data(&info)?,
            Event::Transcribe(params) => raw.data = to_data(&params)?,
            Event::AudioStart(format) => raw.data = to_data(&format)?,
            Event::AudioChunk { format, audio } => {
                raw.data = to_data(&format)?;
                raw.payload = Some(audio);
            }
            Event::Transcript { text } => raw.data = to_data(&TextData { text })?,
            Event::Error { text, code } => raw.data = to_data(&ErrorData { text, code })?,
            Event::Ping { text } | Event::Pong { text } => {
                raw.data = to_data(&OptionalTextData { text })?
            }
        }
        Ok(raw)
    }
}

fn parse_data<T: DeserializeOwned>(event_type: &str, data: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(data)).map_err(|e| {
        BridgeError::violation(format!("invalid data for '{event_type}' event: {e}"))
    })
}

fn to_data<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(BridgeError::Other(format!(
            "event data must be a JSON object, got {other}"
        ))),
        Err(e) => Err(BridgeError::Other(format!(
            "Failed to serialize event data: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(event_type: &str, data: Value) -> RawEvent {
        RawEvent {
            event_type: event_type.to_string(),
            data: data.as_object().cloned().unwrap_or_default(),
            payload: None,
        }
    }

    #[test]
    fn test_transcribe_with_overrides() {
        let event = Event::from_raw(raw(
            "transcribe",
            json!({"language": "de", "prompt": "Licht", "temperature": 0.3}),
        ))
        .unwrap();

        assert_eq!(
            event,
            Event::Transcribe(TranscribeParams {
                name: None,
                language: Some("de".to_string()),
                prompt: Some("Licht".to_string()),
                temperature: Some(0.3),
            })
        );
    }

    #[test]
    fn test_transcribe_without_data() {
        let event = Event::from_raw(RawEvent::new("transcribe")).unwrap();
        assert_eq!(event, Event::Transcribe(TranscribeParams::default()));
    }

    #[test]
    fn test_audio_chunk_carries_payload() {
        let mut frame = raw("audio-chunk", json!({"rate": 16000, "width": 2, "channels": 1}));
        frame.payload = Some(vec![1, 2, 3, 4]);

        match Event::from_raw(frame).unwrap() {
            Event::AudioChunk { format, audio } => {
                assert_eq!(format, AudioFormat::default());
                assert_eq!(audio, vec![1, 2, 3, 4]);
            }
            other => panic!("Expected AudioChunk, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_chunk_ignores_extra_fields() {
        let frame = raw(
            "audio-chunk",
            json!({"rate": 16000, "width": 2, "channels": 1, "timestamp": 120}),
        );
        assert!(matches!(
            Event::from_raw(frame).unwrap(),
            Event::AudioChunk { .. }
        ));
    }

    #[test]
    fn test_audio_chunk_without_format_is_violation() {
        let result = Event::from_raw(raw("audio-chunk", json!({})));
        assert!(matches!(
            result,
            Err(BridgeError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_unknown_event_is_violation() {
        let result = Event::from_raw(RawEvent::new("synthesize"));
        match result {
            Err(BridgeError::ProtocolViolation { message }) => {
                assert!(message.contains("synthesize"));
            }
            other => panic!("Expected ProtocolViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_transcript_data_format() {
        let raw = Event::Transcript {
            text: "hello world".to_string(),
        }
        .into_raw()
        .unwrap();
        assert_eq!(raw.event_type, "transcript");
        assert_eq!(Value::Object(raw.data), json!({"text": "hello world"}));
        assert!(raw.payload.is_none());
    }

    #[test]
    fn test_error_event_from_bridge_error() {
        let event = Event::from_error(&BridgeError::BackendRejected {
            status: 401,
            body: "bad key".to_string(),
        });
        let raw = event.into_raw().unwrap();
        assert_eq!(raw.event_type, "error");
        assert_eq!(
            Value::Object(raw.data),
            json!({
                "text": "Transcription backend rejected request (401): bad key",
                "code": "backend_rejected"
            })
        );
    }

    #[test]
    fn test_ping_pong_text_is_optional() {
        assert_eq!(
            Event::from_raw(RawEvent::new("ping")).unwrap(),
            Event::Ping { text: None }
        );
        let raw = Event::Pong { text: None }.into_raw().unwrap();
        assert!(raw.data.is_empty());
    }

    #[test]
    fn test_stop_and_describe_have_no_data() {
        for event in [Event::AudioStop, Event::Describe] {
            let raw = event.into_raw().unwrap();
            assert!(raw.data.is_empty());
            assert!(raw.payload.is_none());
        }
    }

    #[test]
    fn test_event_types_are_kebab_case() {
        assert_eq!(Event::AudioStart(AudioFormat::default()).event_type(), "audio-start");
        assert_eq!(Event::AudioStop.event_type(), "audio-stop");
        assert_eq!(
            Event::AudioChunk {
                format: AudioFormat::default(),
                audio: vec![]
            }
            .event_type(),
            "audio-chunk"
        );
    }
}
