//! wyoming-whisper-bridge - Wyoming speech-to-text server for Whisper HTTP APIs
//!
//! Accepts Wyoming `transcribe` / `audio-*` sessions and forwards the audio to
//! a whisper.cpp server or the OpenAI transcription API, one request at a time.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod info;
pub mod ipc;
pub mod stt;

// Core trait
pub use stt::transcriber::Transcriber;

// Backends
pub use stt::gate::{GatePermit, TranscriptionGate};
pub use stt::http::{Backend, HttpTranscriber};
pub use stt::transcriber::{MockTranscriber, TranscriptionRequest};

// Sessions and serving
pub use daemon::run_daemon;
pub use daemon::session::{Phase, Session, SessionParams};
pub use ipc::protocol::Event;
pub use ipc::server::{ListenUri, Server};

// Error handling
pub use error::{BridgeError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.0+abc1234"` when git hash is available, `"0.3.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
