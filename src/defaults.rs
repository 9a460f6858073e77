//! Default configuration constants for wyoming-whisper-bridge.
//!
//! Shared between the config file layer, the CLI and the session defaults so
//! that every entry point agrees on the same values.

/// Default listen URI.
///
/// 10300 is the port Wyoming speech-to-text services conventionally use.
pub const DEFAULT_URI: &str = "tcp://0.0.0.0:10300";

/// Default backend: a whisper.cpp server on localhost.
pub const DEFAULT_API: &str = "http://127.0.0.1:8080";

/// Backend selector for the OpenAI transcription API.
pub const OPENAI_API: &str = "openai";

/// Base URL of the OpenAI REST API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI model id. Only `whisper-1` accepts every request option.
pub const OPENAI_DEFAULT_MODEL: &str = "whisper-1";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// Default backend request timeout in seconds.
///
/// Long recordings on CPU-only whisper.cpp servers can take tens of seconds.
pub const BACKEND_TIMEOUT_SECS: u64 = 60;

/// How long running sessions may finish after shutdown is requested.
pub const DRAIN_TIMEOUT_SECS: u64 = 5;

/// Audio format assumed when a client sends chunks without ever announcing one.
pub const SAMPLE_RATE: u32 = 16000;
pub const SAMPLE_WIDTH: u16 = 2;
pub const CHANNELS: u16 = 1;

/// Maximum size of one event header line.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Maximum size of an event's separate data section.
pub const MAX_DATA_BYTES: usize = 1024 * 1024;

/// Maximum size of an event payload (one audio chunk).
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Maximum audio buffered by one session before further chunks are refused.
///
/// About 35 minutes of 16 kHz 16-bit mono, far below the 4 GiB WAV ceiling.
pub const MAX_SESSION_AUDIO_BYTES: usize = 64 * 1024 * 1024;

/// Maximum number of characters of a backend error body kept for reporting.
pub const MAX_ERROR_BODY_LEN: usize = 500;

/// Version reported for the backend model in `info`.
pub const MODEL_VERSION: &str = "1.0";

/// Wyoming protocol version advertised in outgoing event headers.
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Languages supported by Whisper, as two-letter ISO-639-1 codes.
pub const WHISPER_LANGUAGES: &[&str] = &[
    "af", "am", "ar", "as", "az", "ba", "be", "bg", "bn", "bo", "br", "bs", "ca", "cs", "cy", "da",
    "de", "el", "en", "es", "et", "eu", "fa", "fi", "fo", "fr", "gl", "gu", "ha", "he", "hi", "hr",
    "ht", "hu", "hy", "id", "is", "it", "ja", "jw", "ka", "kk", "km", "kn", "ko", "la", "lb", "ln",
    "lo", "lt", "lv", "mg", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my", "ne", "nl", "nn", "no",
    "oc", "pa", "pl", "ps", "pt", "ro", "ru", "sa", "sd", "si", "sk", "sl", "sn", "so", "sq", "sr",
    "su", "sv", "sw", "ta", "te", "tg", "th", "tk", "tl", "tr", "tt", "uk", "ur", "uz", "vi", "yi",
    "yo", "zh",
];
