//! Connection handler: feeds decoded events into a [`Session`] and writes
//! its answers back.

use crate::daemon::DaemonState;
use crate::daemon::session::Session;
use crate::error::{BridgeError, Result};
use crate::ipc::codec::{read_event, write_event};
use crate::ipc::protocol::Event;
use crate::ipc::server::{BoxedWriter, Connection, ConnectionHandler};
use std::sync::Arc;
use tracing::Instrument;

/// Connection handler serving Wyoming sessions.
pub struct SessionHandler {
    state: Arc<DaemonState>,
}

impl SessionHandler {
    pub fn new(state: Arc<DaemonState>) -> Self {
        Self { state }
    }

    async fn serve(&self, connection: Connection) -> Result<()> {
        let Connection {
            id,
            mut reader,
            mut writer,
            mut shutdown,
            ..
        } = connection;

        let mut session = Session::new(
            id,
            self.state.session_defaults.clone(),
            Arc::clone(&self.state.transcriber),
            self.state.gate.clone(),
            Arc::clone(&self.state.info),
        );

        let result = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::debug!("Server shutting down, closing connection");
                    break Ok(());
                }
                frame = read_event(&mut reader) => frame,
            };

            let raw = match frame {
                Ok(Some(raw)) => raw,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            let event = match Event::from_raw(raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring event");
                    continue;
                }
            };

            tracing::trace!(event = event.event_type(), "Received event");

            let replies = match session.on_event(event).await {
                Ok(replies) => replies,
                Err(e @ BridgeError::ProtocolViolation { .. }) => {
                    tracing::warn!(error = %e, "Ignoring event");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Session error");
                    vec![Event::from_error(&e)]
                }
            };

            for reply in replies {
                if let Err(e) = send(&mut writer, reply).await {
                    session.on_disconnect();
                    return Err(e);
                }
            }
        };

        session.on_disconnect();
        result
    }
}

async fn send(writer: &mut BoxedWriter, event: Event) -> Result<()> {
    write_event(writer, &event.into_raw()?).await
}

#[async_trait::async_trait]
impl ConnectionHandler for SessionHandler {
    async fn handle(&self, connection: Connection) -> Result<()> {
        let span = tracing::info_span!("connection", id = connection.id, peer = %connection.peer);
        async move {
            tracing::debug!("Client connected");
            let result = self.serve(connection).await;
            match &result {
                Ok(()) => tracing::debug!("Client disconnected"),
                Err(e @ BridgeError::Framing { .. }) => {
                    tracing::warn!(error = %e, "Closing connection after malformed frame")
                }
                Err(_) => {}
            }
            result
        }
        .instrument(span)
        .await
    }
}
