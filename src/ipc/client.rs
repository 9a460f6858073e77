//! Client side of the event protocol.
//!
//! Used by the end-to-end tests and handy for poking a running bridge.

use crate::error::{BridgeError, Result};
use crate::ipc::codec::{read_event, write_event};
use crate::ipc::protocol::Event;
use crate::ipc::server::{BoxedReader, BoxedWriter, ListenUri};
use tokio::io::BufReader;
use tokio::net::{TcpStream, UnixStream};

pub struct EventClient {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

impl EventClient {
    /// Connect to a bridge listening on `uri`.
    ///
    /// # Errors
    /// Returns `BridgeError::Socket` if the connection fails
    pub async fn connect(uri: &ListenUri) -> Result<Self> {
        let (reader, writer): (BoxedReader, BoxedWriter) = match uri {
            ListenUri::Unix(path) => {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| BridgeError::Socket {
                        message: format!("Failed to connect to {}: {}", uri, e),
                    })?;
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
            ListenUri::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| BridgeError::Socket {
                        message: format!("Failed to connect to {}: {}", uri, e),
                    })?;
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
        };

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn send(&mut self, event: Event) -> Result<()> {
        write_event(&mut self.writer, &event.into_raw()?).await
    }

    /// Next event from the server, or `None` once it closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Event>> {
        match read_event(&mut self.reader).await? {
            Some(raw) => Event::from_raw(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Send `describe` and wait for the `info` answer.
    pub async fn describe(&mut self) -> Result<Event> {
        self.send(Event::Describe).await?;
        self.recv().await?.ok_or_else(|| BridgeError::Socket {
            message: "Connection closed before info arrived".to_string(),
        })
    }
}
