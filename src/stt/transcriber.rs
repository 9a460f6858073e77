use crate::audio::AudioClip;
use crate::error::{BridgeError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One transcription job, built from a session when its audio is flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub audio: AudioClip,
    /// Two-letter ISO-639-1 code, or `None` for auto-detection
    pub language: Option<String>,
    pub prompt: Option<String>,
    /// Sampling temperature, already clamped to 0.0..=1.0
    pub temperature: f32,
}

/// Trait for speech-to-text backends.
///
/// This trait allows swapping implementations (HTTP backends vs mock).
/// Implementations perform exactly one backend call per invocation and
/// never retry.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the request's audio to text.
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String>;

    /// Get the name of the backend model
    fn model_name(&self) -> &str;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
#[async_trait::async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String> {
        (**self).transcribe(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Failure a [`MockTranscriber`] can be configured to return.
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    Unreachable,
    Timeout,
    Rejected { status: u16, body: String },
    Malformed,
}

impl MockFailure {
    fn to_error(&self) -> BridgeError {
        match self {
            MockFailure::Unreachable => BridgeError::BackendUnreachable {
                message: "mock backend unreachable".to_string(),
            },
            MockFailure::Timeout => BridgeError::BackendTimeout {
                timeout: Duration::from_secs(1),
            },
            MockFailure::Rejected { status, body } => BridgeError::BackendRejected {
                status: *status,
                body: body.clone(),
            },
            MockFailure::Malformed => BridgeError::BackendProtocolError {
                message: "mock response without text".to_string(),
            },
        }
    }
}

/// Mock transcriber for testing
///
/// Records every request it receives and the highest number of calls it
/// ever saw running at the same time.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    failure: Option<MockFailure>,
    delay: Duration,
    requests: Arc<Mutex<Vec<TranscriptionRequest>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            failure: None,
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Configure how long each call takes
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<TranscriptionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Highest number of overlapping calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls that ran to completion
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        match &self.failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(self.response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
