//! Per-connection recognition session.
//!
//! A session moves `Idle → Receiving → Transcribing → Idle` and ends in
//! `Closed`. Each inbound event yields zero or more outbound events, or a
//! protocol violation that the caller logs and otherwise ignores.
//!
//! The backend call runs in its own task that holds the transcription gate.
//! If the session goes away mid-call the task still finishes, releases the
//! gate, and its result is dropped.

use crate::audio::{AudioBuffer, AudioFormat};
use crate::config::TranscriptionConfig;
use crate::defaults::{AUTO_LANGUAGE, DEFAULT_TEMPERATURE, WHISPER_LANGUAGES};
use crate::error::{BridgeError, Result};
use crate::info::Info;
use crate::ipc::protocol::{Event, TranscribeParams};
use crate::stt::gate::TranscriptionGate;
use crate::stt::transcriber::{Transcriber, TranscriptionRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Receiving,
    Transcribing,
    Closed,
}

/// Recognition parameters of one session, after defaults were applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// `None` means auto-detect
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub temperature: f32,
}

impl SessionParams {
    /// Process-wide defaults from configuration.
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        let language = match normalize_language(&config.language) {
            Ok(language) => language,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to automatic language detection");
                None
            }
        };
        Self {
            language,
            prompt: config.prompt.clone().filter(|p| !p.trim().is_empty()),
            temperature: clamp_temperature(config.temperature, DEFAULT_TEMPERATURE),
        }
    }

    /// Apply a client's overrides on top of `self`.
    ///
    /// An unusable language keeps the default and is logged; it does not fail
    /// the session.
    pub fn with_overrides(&self, overrides: &TranscribeParams) -> Self {
        let mut params = self.clone();

        if let Some(requested) = overrides.language.as_deref() {
            match normalize_language(requested) {
                Ok(language) => params.language = language,
                Err(e) => tracing::warn!(error = %e, "Ignoring requested language"),
            }
        }
        if let Some(prompt) = &overrides.prompt {
            params.prompt = Some(prompt.clone()).filter(|p| !p.trim().is_empty());
        }
        if let Some(temperature) = overrides.temperature {
            params.temperature = clamp_temperature(temperature, self.temperature);
        }

        params
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self::from_config(&TranscriptionConfig::default())
    }
}

/// Clamp a sampling temperature into `0.0..=1.0`. NaN becomes `fallback`.
pub fn clamp_temperature(temperature: f32, fallback: f32) -> f32 {
    if temperature.is_nan() {
        return fallback.clamp(0.0, 1.0);
    }
    temperature.clamp(0.0, 1.0)
}

/// Normalize a language value.
///
/// `"auto"` and the empty string mean auto-detection (`Ok(None)`). Anything
/// else must be an ISO-639-1 code Whisper knows and comes back lowercased.
pub fn normalize_language(raw: &str) -> Result<Option<String>> {
    let language = raw.trim().to_ascii_lowercase();
    if language.is_empty() || language == AUTO_LANGUAGE {
        return Ok(None);
    }
    if WHISPER_LANGUAGES.contains(&language.as_str()) {
        return Ok(Some(language));
    }
    Err(BridgeError::violation(format!(
        "'{raw}' is not a language code supported by Whisper"
    )))
}

pub struct Session {
    id: u64,
    phase: Phase,
    buffer: AudioBuffer,
    defaults: SessionParams,
    params: SessionParams,
    transcriber: Arc<dyn Transcriber>,
    gate: TranscriptionGate,
    info: Arc<Info>,
}

impl Session {
    pub fn new(
        id: u64,
        defaults: SessionParams,
        transcriber: Arc<dyn Transcriber>,
        gate: TranscriptionGate,
        info: Arc<Info>,
    ) -> Self {
        Self {
            id,
            phase: Phase::Idle,
            buffer: AudioBuffer::new(),
            params: defaults.clone(),
            defaults,
            transcriber,
            gate,
            info,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Parameters the next transcription will use.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Bytes buffered for the next transcription.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Dispatch one inbound event.
    pub async fn on_event(&mut self, event: Event) -> Result<Vec<Event>> {
        match event {
            Event::Describe => Ok(vec![Event::Info((*self.info).clone())]),
            Event::Ping { text } => Ok(vec![Event::Pong { text }]),
            Event::Transcribe(params) => self.on_session_start(params),
            Event::AudioStart(format) => self.on_audio_start(format),
            Event::AudioChunk { format, audio } => self.on_audio_chunk(format, &audio),
            Event::AudioStop => self.on_session_stop().await,
            other @ (Event::Info(_)
            | Event::Transcript { .. }
            | Event::Error { .. }
            | Event::Pong { .. }) => Err(BridgeError::violation(format!(
                "'{}' is not accepted from clients",
                other.event_type()
            ))),
        }
    }

    /// Start a session with the client's parameter overrides.
    ///
    /// Repeating it before any audio arrived just replaces the overrides.
    pub fn on_session_start(&mut self, overrides: TranscribeParams) -> Result<Vec<Event>> {
        match self.phase {
            Phase::Idle => {}
            Phase::Receiving if self.buffer.is_empty() => {}
            Phase::Receiving => {
                return Err(BridgeError::violation(
                    "transcribe received after audio; finish the current session first",
                ));
            }
            Phase::Transcribing | Phase::Closed => {
                return Err(self.wrong_phase("transcribe"));
            }
        }

        if let Some(name) = &overrides.name {
            tracing::debug!(requested_model = %name, model = self.transcriber.model_name(), "Client requested a model");
        }
        self.params = self.defaults.with_overrides(&overrides);
        self.phase = Phase::Receiving;
        tracing::debug!(params = ?self.params, "Session started");
        Ok(Vec::new())
    }

    /// `audio-start` fixes the audio format. In `Idle` it also starts a
    /// session with the default parameters.
    pub fn on_audio_start(&mut self, format: AudioFormat) -> Result<Vec<Event>> {
        match self.phase {
            Phase::Idle => {
                self.params = self.defaults.clone();
                self.phase = Phase::Receiving;
                tracing::debug!("Session started implicitly by audio-start");
            }
            Phase::Receiving => {}
            Phase::Transcribing | Phase::Closed => {
                return Err(self.wrong_phase("audio-start"));
            }
        }
        self.buffer.set_format(format)?;
        Ok(Vec::new())
    }

    /// Append one chunk of PCM in arrival order.
    ///
    /// Chunks past the per-session audio limit are refused as violations and
    /// leave the buffered audio untouched.
    pub fn on_audio_chunk(&mut self, format: AudioFormat, bytes: &[u8]) -> Result<Vec<Event>> {
        if self.phase != Phase::Receiving {
            return Err(self.wrong_phase("audio-chunk"));
        }
        self.buffer.append(Some(format), bytes)?;
        Ok(Vec::new())
    }

    /// Transcribe everything buffered and answer with exactly one transcript
    /// or error event. An empty buffer is still sent to the backend.
    pub async fn on_session_stop(&mut self) -> Result<Vec<Event>> {
        if self.phase != Phase::Receiving {
            return Err(self.wrong_phase("audio-stop"));
        }

        self.phase = Phase::Transcribing;
        let chunks = self.buffer.chunk_count();
        let request = self.take_request();
        let bytes = request.audio.pcm.len();
        let duration_secs = request.audio.duration_secs();
        let started = Instant::now();

        let outcome = match self.spawn_transcription(request).await {
            Ok(result) => result,
            Err(e) => Err(BridgeError::Other(format!("Transcription task failed: {e}"))),
        };

        self.phase = Phase::Idle;
        self.params = self.defaults.clone();

        let event = match outcome {
            Ok(text) => {
                tracing::debug!(
                    chunks,
                    bytes,
                    duration_secs,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    text = %text,
                    "Transcription finished"
                );
                Event::Transcript { text }
            }
            Err(e) => {
                tracing::warn!(bytes, code = e.code(), error = %e, "Transcription failed");
                Event::from_error(&e)
            }
        };
        Ok(vec![event])
    }

    /// Connection closed. Buffered audio is still transcribed in the
    /// background; nobody is left to receive the result.
    pub fn on_disconnect(&mut self) -> Vec<Event> {
        if self.phase == Phase::Receiving && !self.buffer.is_empty() {
            let request = self.take_request();
            let bytes = request.audio.pcm.len();
            let job = self.spawn_transcription(request);
            let id = self.id;
            tokio::spawn(async move {
                match job.await {
                    Ok(Ok(_)) => {
                        tracing::debug!(session = id, bytes, "Discarded transcript of closed session")
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(session = id, error = %e, "Transcription of closed session failed")
                    }
                    Err(e) => tracing::warn!(session = id, error = %e, "Transcription task failed"),
                }
            });
        }

        self.buffer.clear();
        self.phase = Phase::Closed;
        Vec::new()
    }

    fn take_request(&mut self) -> TranscriptionRequest {
        TranscriptionRequest {
            audio: self.buffer.take(),
            language: self.params.language.clone(),
            prompt: self.params.prompt.clone(),
            temperature: self.params.temperature,
        }
    }

    /// Run one backend call under the gate in its own task.
    fn spawn_transcription(&self, request: TranscriptionRequest) -> JoinHandle<Result<String>> {
        let gate = self.gate.clone();
        let transcriber = Arc::clone(&self.transcriber);
        let id = self.id;
        tokio::spawn(async move {
            let waited = Instant::now();
            let _permit = gate.acquire().await;
            tracing::trace!(
                session = id,
                waited_ms = waited.elapsed().as_millis() as u64,
                "Acquired transcription gate"
            );
            transcriber.transcribe(&request).await
        })
    }

    fn wrong_phase(&self, event_type: &str) -> BridgeError {
        BridgeError::violation(format!(
            "{event_type} is not valid while {:?}",
            self.phase
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::defaults::{MAX_PAYLOAD_BYTES, MAX_SESSION_AUDIO_BYTES};
    use crate::error::codes;
    use crate::stt::transcriber::{MockFailure, MockTranscriber};
    use std::time::Duration;

    fn info() -> Arc<Info> {
        Arc::new(Info::for_backend(&BackendConfig::default()))
    }

    fn session_with(mock: &MockTranscriber, gate: &TranscriptionGate) -> Session {
        Session::new(
            1,
            SessionParams::default(),
            Arc::new(mock.clone()),
            gate.clone(),
            info(),
        )
    }

    fn chunk(bytes: &[u8]) -> Event {
        Event::AudioChunk {
            format: AudioFormat::default(),
            audio: bytes.to_vec(),
        }
    }

    async fn wait_until_released(gate: &TranscriptionGate) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while gate.is_held() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("gate should be released");
    }

    #[test]
    fn test_clamp_temperature() {
        assert_eq!(clamp_temperature(1.5, 0.0), 1.0);
        assert_eq!(clamp_temperature(clamp_temperature(1.5, 0.0), 0.0), 1.0);
        assert_eq!(clamp_temperature(-0.3, 0.0), 0.0);
        assert_eq!(clamp_temperature(0.4, 0.0), 0.4);
        assert_eq!(clamp_temperature(f32::NAN, 0.2), 0.2);
        assert_eq!(clamp_temperature(f32::INFINITY, 0.0), 1.0);
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("auto").unwrap(), None);
        assert_eq!(normalize_language("  ").unwrap(), None);
        assert_eq!(normalize_language("AUTO").unwrap(), None);
        assert_eq!(normalize_language("DE").unwrap(), Some("de".to_string()));
        assert_eq!(normalize_language(" en ").unwrap(), Some("en".to_string()));
        assert!(normalize_language("english").is_err());
        assert!(normalize_language("e1").is_err());
        assert!(normalize_language("en-US").is_err());
        assert!(normalize_language("xx").is_err());
        assert!(normalize_language("QQ").is_err());
    }

    #[test]
    fn test_params_from_config() {
        let config = TranscriptionConfig {
            language: "FR".to_string(),
            prompt: Some("   ".to_string()),
            temperature: 0.3,
        };
        let params = SessionParams::from_config(&config);
        assert_eq!(params.language.as_deref(), Some("fr"));
        assert_eq!(params.prompt, None);
        assert_eq!(params.temperature, 0.3);
    }

    #[test]
    fn test_overrides_fall_back_to_defaults() {
        let defaults = SessionParams {
            language: Some("de".to_string()),
            prompt: Some("Küche".to_string()),
            temperature: 0.2,
        };

        let params = defaults.with_overrides(&TranscribeParams::default());
        assert_eq!(params, defaults);

        let params = defaults.with_overrides(&TranscribeParams {
            language: Some("klingon".to_string()),
            temperature: Some(f32::NAN),
            ..Default::default()
        });
        assert_eq!(params.language.as_deref(), Some("de"));
        assert_eq!(params.temperature, 0.2);

        let params = defaults.with_overrides(&TranscribeParams {
            language: Some("auto".to_string()),
            prompt: Some("Garage".to_string()),
            temperature: Some(1.5),
            ..Default::default()
        });
        assert_eq!(params.language, None);
        assert_eq!(params.prompt.as_deref(), Some("Garage"));
        assert_eq!(params.temperature, 1.0);
    }

    #[tokio::test]
    async fn test_full_session_yields_one_transcript() {
        let mock = MockTranscriber::new("mock").with_response("hello world");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        let start = Event::Transcribe(TranscribeParams {
            language: Some("en".to_string()),
            ..Default::default()
        });
        assert!(session.on_event(start).await.unwrap().is_empty());
        assert_eq!(session.phase(), Phase::Receiving);
        assert!(session.on_event(chunk(&[1, 2])).await.unwrap().is_empty());
        assert!(session.on_event(chunk(&[3, 4])).await.unwrap().is_empty());

        let events = session.on_event(Event::AudioStop).await.unwrap();
        assert_eq!(
            events,
            vec![Event::Transcript {
                text: "hello world".to_string()
            }]
        );
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.buffered_bytes(), 0);
        assert!(!gate.is_held());

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].audio.pcm, vec![1, 2, 3, 4]);
        assert_eq!(requests[0].language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_chunks_are_concatenated_in_order() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        let mut expected = Vec::new();
        for i in 0u8..50 {
            let bytes: Vec<u8> = (0..(i as usize % 7 + 1) * 2)
                .map(|j| i.wrapping_mul(31).wrapping_add(j as u8))
                .collect();
            expected.extend_from_slice(&bytes);
            session
                .on_audio_chunk(AudioFormat::default(), &bytes)
                .unwrap();
        }
        session.on_session_stop().await.unwrap();

        assert_eq!(mock.requests()[0].audio.pcm, expected);
    }

    #[tokio::test]
    async fn test_audio_start_starts_session_implicitly() {
        let mock = MockTranscriber::new("mock").with_response("ok");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        let format = AudioFormat {
            rate: 22050,
            width: 2,
            channels: 1,
        };
        session.on_event(Event::AudioStart(format)).await.unwrap();
        assert_eq!(session.phase(), Phase::Receiving);

        session
            .on_event(Event::AudioChunk {
                format,
                audio: vec![0; 4],
            })
            .await
            .unwrap();
        session.on_event(Event::AudioStop).await.unwrap();

        assert_eq!(mock.requests()[0].audio.format, format);
    }

    #[tokio::test]
    async fn test_empty_buffer_still_transcribes() {
        let mock = MockTranscriber::new("mock").with_response("");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        let events = session.on_session_stop().await.unwrap();

        assert_eq!(
            events,
            vec![Event::Transcript {
                text: String::new()
            }]
        );
        assert_eq!(mock.requests().len(), 1);
        assert!(mock.requests()[0].audio.pcm.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_while_idle_is_a_violation() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        let result = session.on_event(chunk(&[1, 2, 3, 4])).await;
        assert!(matches!(result, Err(BridgeError::ProtocolViolation { .. })));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.buffered_bytes(), 0);

        let result = session.on_event(Event::AudioStop).await;
        assert!(matches!(result, Err(BridgeError::ProtocolViolation { .. })));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_session_usable_after_violation() {
        let mock = MockTranscriber::new("mock").with_response("still here");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        assert!(session.on_event(chunk(&[9, 9])).await.is_err());
        assert!(
            session
                .on_event(Event::Transcript {
                    text: "x".to_string()
                })
                .await
                .is_err()
        );

        session.on_event(Event::AudioStart(AudioFormat::default())).await.unwrap();
        session.on_event(chunk(&[1, 2])).await.unwrap();
        let events = session.on_event(Event::AudioStop).await.unwrap();
        assert_eq!(
            events,
            vec![Event::Transcript {
                text: "still here".to_string()
            }]
        );
        assert_eq!(mock.requests()[0].audio.pcm, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_format_change_mid_session_is_dropped() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        session.on_audio_chunk(AudioFormat::default(), &[1, 2]).unwrap();
        let other = AudioFormat {
            rate: 8000,
            width: 2,
            channels: 1,
        };
        assert!(session.on_audio_chunk(other, &[3, 4]).is_err());
        session.on_session_stop().await.unwrap();

        assert_eq!(mock.requests()[0].audio.pcm, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_transcribe_after_audio_is_a_violation() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        // Replacing overrides before audio is fine
        session
            .on_session_start(TranscribeParams {
                language: Some("nl".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.params().language.as_deref(), Some("nl"));

        session.on_audio_chunk(AudioFormat::default(), &[0, 0]).unwrap();
        assert!(session.on_session_start(TranscribeParams::default()).is_err());
        assert_eq!(session.params().language.as_deref(), Some("nl"));
    }

    #[tokio::test]
    async fn test_temperature_override_is_clamped() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session
            .on_session_start(TranscribeParams {
                temperature: Some(1.5),
                ..Default::default()
            })
            .unwrap();
        session.on_session_stop().await.unwrap();

        assert_eq!(mock.requests()[0].temperature, 1.0);
    }

    #[tokio::test]
    async fn test_params_reset_after_stop() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session
            .on_session_start(TranscribeParams {
                language: Some("it".to_string()),
                prompt: Some("pizza".to_string()),
                ..Default::default()
            })
            .unwrap();
        session.on_session_stop().await.unwrap();
        session.on_audio_start(AudioFormat::default()).unwrap();
        session.on_session_stop().await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].language.as_deref(), Some("it"));
        assert_eq!(requests[1].language, None);
        assert_eq!(requests[1].prompt, None);
    }

    #[tokio::test]
    async fn test_backend_rejection_yields_one_error_and_releases_gate() {
        let mock = MockTranscriber::new("mock").with_failure(MockFailure::Rejected {
            status: 401,
            body: "invalid api key".to_string(),
        });
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        session.on_audio_chunk(AudioFormat::default(), &[1, 2]).unwrap();
        let events = session.on_session_stop().await.unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Error { text, code } => {
                assert_eq!(code.as_deref(), Some(codes::BACKEND_REJECTED));
                assert!(text.contains("401"));
                assert!(text.contains("invalid api key"));
            }
            other => panic!("Expected error event, got {other:?}"),
        }
        assert!(!gate.is_held());
        assert_eq!(session.phase(), Phase::Idle);
    }

    async fn assert_failure_reported(failure: MockFailure, expected_code: &str) {
        let mock = MockTranscriber::new("mock").with_failure(failure);
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        session.on_audio_chunk(AudioFormat::default(), &[1, 2]).unwrap();
        let events = session.on_session_stop().await.unwrap();

        match events.as_slice() {
            [Event::Error { code, .. }] => assert_eq!(code.as_deref(), Some(expected_code)),
            other => panic!("Expected one error event, got {other:?}"),
        }
        assert!(!gate.is_held());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(mock.completed(), 1);
    }

    #[tokio::test]
    async fn test_backend_timeout_yields_one_error_and_releases_gate() {
        assert_failure_reported(MockFailure::Timeout, codes::BACKEND_TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_one_error_and_releases_gate() {
        assert_failure_reported(MockFailure::Unreachable, codes::BACKEND_UNREACHABLE).await;
    }

    #[tokio::test]
    async fn test_audio_past_session_limit_is_refused() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        let big = vec![0u8; MAX_PAYLOAD_BYTES];
        let fits = MAX_SESSION_AUDIO_BYTES / MAX_PAYLOAD_BYTES;
        for _ in 0..fits {
            session.on_audio_chunk(AudioFormat::default(), &big).unwrap();
        }
        assert_eq!(session.buffered_bytes(), fits * MAX_PAYLOAD_BYTES);

        let result = session.on_audio_chunk(AudioFormat::default(), &big);
        assert!(matches!(result, Err(BridgeError::ProtocolViolation { .. })));
        assert_eq!(session.buffered_bytes(), fits * MAX_PAYLOAD_BYTES);
        assert_eq!(session.phase(), Phase::Receiving);

        // What was accepted still gets transcribed
        let events = session.on_session_stop().await.unwrap();
        assert!(matches!(events.as_slice(), [Event::Transcript { .. }]));
        assert_eq!(mock.requests()[0].audio.pcm.len(), fits * MAX_PAYLOAD_BYTES);
    }

    #[tokio::test]
    async fn test_malformed_backend_response_is_generic_failure() {
        let mock = MockTranscriber::new("mock").with_failure(MockFailure::Malformed);
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        let events = session.on_session_stop().await.unwrap();

        assert_eq!(
            events,
            vec![Event::Error {
                text: "Transcription failed".to_string(),
                code: Some(codes::TRANSCRIPTION_FAILED.to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_describe_and_ping() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        let events = session.on_event(Event::Describe).await.unwrap();
        assert_eq!(events, vec![Event::Info((*info()).clone())]);

        let events = session
            .on_event(Event::Ping {
                text: Some("hi".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(
            events,
            vec![Event::Pong {
                text: Some("hi".to_string())
            }]
        );
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_session_does_not_leak_gate() {
        let mock = MockTranscriber::new("mock").with_delay(Duration::from_millis(100));
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        session.on_audio_chunk(AudioFormat::default(), &[1, 2]).unwrap();

        // Drop the session mid-call, as an aborted connection task would
        let stopped =
            tokio::time::timeout(Duration::from_millis(20), session.on_session_stop()).await;
        assert!(stopped.is_err());
        drop(session);

        assert!(gate.is_held());
        wait_until_released(&gate).await;
        assert_eq!(mock.completed(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_with_buffered_audio_transcribes_in_background() {
        let mock = MockTranscriber::new("mock").with_delay(Duration::from_millis(30));
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        session.on_audio_chunk(AudioFormat::default(), &[5, 6, 7, 8]).unwrap();

        assert!(session.on_disconnect().is_empty());
        assert_eq!(session.phase(), Phase::Closed);

        tokio::time::timeout(Duration::from_secs(2), async {
            while mock.completed() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("background transcription should run");
        wait_until_released(&gate).await;
        assert_eq!(mock.requests()[0].audio.pcm, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_disconnect_without_audio_does_nothing() {
        let mock = MockTranscriber::new("mock");
        let gate = TranscriptionGate::new();
        let mut session = session_with(&mock, &gate);

        session.on_session_start(TranscribeParams::default()).unwrap();
        assert!(session.on_disconnect().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(mock.requests().is_empty());
        assert!(session.on_event(chunk(&[1, 2])).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_never_overlap_backend_calls() {
        let mock = MockTranscriber::new("mock").with_delay(Duration::from_millis(5));
        let gate = TranscriptionGate::new();

        let mut tasks = Vec::new();
        for n in 0u8..8 {
            let mut session = session_with(&mock, &gate);
            tasks.push(tokio::spawn(async move {
                for s in 0u8..3 {
                    session.on_session_start(TranscribeParams::default()).unwrap();
                    session.on_audio_chunk(AudioFormat::default(), &[n, s]).unwrap();
                    let events = session.on_session_stop().await.unwrap();
                    assert!(matches!(events.as_slice(), [Event::Transcript { .. }]));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(mock.completed(), 24);
        assert_eq!(mock.max_in_flight(), 1);
        assert!(!gate.is_held());
    }
}
