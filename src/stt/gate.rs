//! Process-wide gate serializing calls to the transcription backend.
//!
//! The backend is either a single local whisper.cpp process or a metered
//! cloud API, so at most one request may be in flight at any time. Every
//! session shares one [`TranscriptionGate`]; holding a [`GatePermit`] is the
//! right to call the backend, and dropping it releases the gate.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct TranscriptionGate {
    lock: Arc<Mutex<()>>,
}

/// Exclusive hold on the backend. Released on drop, including during unwinding.
#[derive(Debug)]
pub struct GatePermit {
    _guard: OwnedMutexGuard<()>,
}

impl TranscriptionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other permit exists.
    ///
    /// Waiters are served in FIFO order, so a session waits at most for the
    /// sessions that queued before it.
    pub async fn acquire(&self) -> GatePermit {
        GatePermit {
            _guard: Arc::clone(&self.lock).lock_owned().await,
        }
    }

    /// True while some permit is held.
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
