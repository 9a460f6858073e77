//! Daemon mode: builds the shared state, serves sessions, handles signals.

pub mod handler;
pub mod session;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::info::Info;
use crate::ipc::server::{ListenUri, Server};
use crate::stt::gate::TranscriptionGate;
use crate::stt::http::HttpTranscriber;
use crate::stt::transcriber::Transcriber;
use session::SessionParams;
use std::sync::Arc;
use std::time::Duration;

/// State shared by every connection.
pub struct DaemonState {
    /// Backend used by all sessions
    pub transcriber: Arc<dyn Transcriber>,
    /// Serializes backend calls across sessions
    pub gate: TranscriptionGate,
    /// Answer to `describe`
    pub info: Arc<Info>,
    /// Parameters for sessions that don't override them
    pub session_defaults: SessionParams,
}

impl DaemonState {
    pub fn new(config: &Config, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            gate: TranscriptionGate::new(),
            info: Arc::new(Info::for_backend(&config.backend)),
            session_defaults: SessionParams::from_config(&config.transcription),
        }
    }
}

/// Run the daemon: build the backend, serve until SIGINT/SIGTERM, drain.
///
/// # Returns
/// Ok(()) on graceful shutdown, error otherwise
pub async fn run_daemon(config: Config) -> Result<()> {
    config.validate()?;

    let transcriber = HttpTranscriber::from_config(&config.backend)?;
    tracing::info!(
        backend = ?transcriber.backend(),
        model = transcriber.model_name(),
        timeout_secs = config.backend.timeout_secs,
        "Transcription backend configured"
    );

    let state = Arc::new(DaemonState::new(&config, Arc::new(transcriber)));
    tracing::debug!(defaults = ?state.session_defaults, "Session defaults");

    let server = Server::bind(ListenUri::parse(&config.server.uri)?)
        .await?
        .with_drain_timeout(Duration::from_secs(config.server.drain_timeout_secs));

    let handler = Arc::new(handler::SessionHandler::new(state));
    server.serve(handler, wait_for_shutdown_signal()).await?;

    tracing::info!("Stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

/// Wait for SIGTERM signal (used by systemd and container runtimes).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| BridgeError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
