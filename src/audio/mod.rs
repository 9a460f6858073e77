//! Audio handling: buffering client PCM and packing it for the backend.

pub mod wav;

pub use wav::{AudioBuffer, AudioClip, AudioFormat};
