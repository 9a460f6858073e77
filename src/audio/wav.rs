//! PCM accumulation and WAV assembly for backend requests.

use crate::defaults;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Raw PCM format announced by the client.
///
/// `width` is the sample width in bytes, as in Wyoming `audio-start`/`audio-chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            rate: defaults::SAMPLE_RATE,
            width: defaults::SAMPLE_WIDTH,
            channels: defaults::CHANNELS,
        }
    }
}

impl AudioFormat {
    /// Bytes per frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Reject formats that can't be packed into a PCM WAV file.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(BridgeError::violation("audio rate must be positive"));
        }
        if !(1..=4).contains(&self.width) {
            return Err(BridgeError::violation(format!(
                "unsupported sample width {} (expected 1-4 bytes)",
                self.width
            )));
        }
        if self.channels == 0 {
            return Err(BridgeError::violation("audio must have at least one channel"));
        }
        Ok(())
    }
}

/// Append-only PCM buffer for one recognition session.
///
/// Chunk boundaries are not kept: the buffer is the in-order concatenation of
/// every payload appended since the last [`AudioBuffer::take`]. The total is
/// capped at `max_bytes`.
#[derive(Debug)]
pub struct AudioBuffer {
    format: Option<AudioFormat>,
    pcm: Vec<u8>,
    chunks: usize,
    max_bytes: usize,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::with_limit(defaults::MAX_SESSION_AUDIO_BYTES)
    }
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            format: None,
            pcm: Vec::new(),
            chunks: 0,
            max_bytes,
        }
    }

    /// Fix the format for the audio that follows.
    ///
    /// A different format is only accepted while the buffer is still empty.
    pub fn set_format(&mut self, format: AudioFormat) -> Result<()> {
        format.validate()?;
        match self.format {
            Some(current) if current != format && !self.pcm.is_empty() => {
                Err(BridgeError::violation(format!(
                    "audio format changed mid-stream from {current:?} to {format:?}"
                )))
            }
            _ => {
                self.format = Some(format);
                Ok(())
            }
        }
    }

    /// Append one chunk. The first chunk's format wins if none was announced.
    ///
    /// A chunk that would push the buffer past its limit is refused whole.
    pub fn append(&mut self, format: Option<AudioFormat>, bytes: &[u8]) -> Result<()> {
        if self.pcm.len() + bytes.len() > self.max_bytes {
            return Err(BridgeError::violation(format!(
                "audio chunk of {} bytes would exceed the {} byte session limit",
                bytes.len(),
                self.max_bytes
            )));
        }
        if let Some(format) = format {
            self.set_format(format)?;
        }
        self.pcm.extend_from_slice(bytes);
        self.chunks += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Drain the buffer into a clip, leaving it empty and without a format.
    pub fn take(&mut self) -> AudioClip {
        let format = self.format.take().unwrap_or_default();
        self.chunks = 0;
        AudioClip {
            format,
            pcm: std::mem::take(&mut self.pcm),
        }
    }

    pub fn clear(&mut self) {
        self.format = None;
        self.pcm.clear();
        self.chunks = 0;
    }
}

/// A finished recording: raw PCM plus its format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub format: AudioFormat,
    pub pcm: Vec<u8>,
}

impl AudioClip {
    pub fn new(format: AudioFormat, pcm: Vec<u8>) -> Self {
        Self { format, pcm }
    }

    pub fn duration_secs(&self) -> f64 {
        let bytes_per_sec = self.format.frame_bytes() as f64 * self.format.rate as f64;
        if bytes_per_sec == 0.0 {
            0.0
        } else {
            self.pcm.len() as f64 / bytes_per_sec
        }
    }

    /// Wrap the PCM in a WAV container.
    ///
    /// A trailing partial frame is dropped; everything else is written verbatim.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        self.format.validate()?;

        let frame = self.format.frame_bytes();
        let usable = self.pcm.len() - self.pcm.len() % frame;
        if usable != self.pcm.len() {
            tracing::warn!(
                dropped = self.pcm.len() - usable,
                "Audio ends with a partial frame, dropping trailing bytes"
            );
        }
        let pcm = &self.pcm[..usable];

        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.rate,
            bits_per_sample: self.format.width * 8,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(usable + 64));
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;

        match self.format.width {
            1 => {
                // 8-bit WAV is unsigned on disk; hound takes signed samples and re-biases.
                for &b in pcm {
                    writer
                        .write_sample((b as i16 - 128) as i8)
                        .map_err(wav_error)?;
                }
            }
            2 => {
                for s in pcm.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([s[0], s[1]]))
                        .map_err(wav_error)?;
                }
            }
            3 => {
                for s in pcm.chunks_exact(3) {
                    let value = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                    writer.write_sample(value).map_err(wav_error)?;
                }
            }
            _ => {
                for s in pcm.chunks_exact(4) {
                    writer
                        .write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                        .map_err(wav_error)?;
                }
            }
        }

        writer.finalize().map_err(wav_error)?;
        Ok(cursor.into_inner())
    }
}

fn wav_error(e: hound::Error) -> BridgeError {
    BridgeError::Audio {
        message: format!("Failed to write WAV data: {}", e),
    }
}
