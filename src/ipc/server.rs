//! Listener for Wyoming clients on a Unix or TCP socket.
//!
//! Every accepted connection runs in its own task. On shutdown the listener
//! closes first, open connections are told to finish, and whatever is still
//! running after the drain period is aborted.

use crate::error::{BridgeError, Result};
use std::fmt;
use std::future::Future;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Where the server listens: `unix:///path/to.sock` or `tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenUri {
    Unix(PathBuf),
    /// `host:port`, resolved at bind time
    Tcp(String),
}

impl ListenUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |message: &str| BridgeError::ConfigInvalidValue {
            key: "server.uri".to_string(),
            message: format!("'{uri}': {message}"),
        };

        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("missing socket path"));
            }
            return Ok(ListenUri::Unix(PathBuf::from(path)));
        }

        if let Some(addr) = uri.strip_prefix("tcp://") {
            let addr = addr.trim_end_matches('/');
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected tcp://host:port"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            port.parse::<u16>()
                .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
            return Ok(ListenUri::Tcp(addr.to_string()));
        }

        Err(invalid("scheme must be unix:// or tcp://"))
    }
}

impl fmt::Display for ListenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenUri::Unix(path) => write!(f, "unix://{}", path.display()),
            ListenUri::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One accepted client.
pub struct Connection {
    /// Process-unique, increasing
    pub id: u64,
    pub peer: String,
    pub reader: BufReader<BoxedReader>,
    pub writer: BoxedWriter,
    /// Flips to `true` when the server starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

/// Handler trait for serving a connection until it closes.
#[async_trait::async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(&self, connection: Connection) -> Result<()>;
}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(BoxedReader, BoxedWriter, String)> {
        match self {
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                let (reader, writer) = stream.into_split();
                Ok((Box::new(reader), Box::new(writer), "unix".to_string()))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok((Box::new(reader), Box::new(writer), addr.to_string()))
            }
        }
    }
}

/// Event server bound to a [`ListenUri`].
pub struct Server {
    uri: ListenUri,
    listener: Listener,
    drain_timeout: Duration,
}

impl Server {
    /// Bind the listener. A leftover Unix socket file is removed first; any
    /// other kind of file at that path is left alone and binding fails.
    pub async fn bind(uri: ListenUri) -> Result<Self> {
        let (uri, listener) = match uri {
            ListenUri::Unix(path) => {
                if let Ok(metadata) = std::fs::symlink_metadata(&path) {
                    if !metadata.file_type().is_socket() {
                        return Err(BridgeError::Socket {
                            message: format!(
                                "Refusing to replace {}: not a socket",
                                path.display()
                            ),
                        });
                    }
                    std::fs::remove_file(&path).map_err(|e| BridgeError::Socket {
                        message: format!(
                            "Failed to remove existing socket {}: {}",
                            path.display(),
                            e
                        ),
                    })?;
                }
                let listener = UnixListener::bind(&path).map_err(|e| BridgeError::Socket {
                    message: format!("Failed to bind to {}: {}", path.display(), e),
                })?;
                (ListenUri::Unix(path), Listener::Unix(listener))
            }
            ListenUri::Tcp(addr) => {
                let listener =
                    TcpListener::bind(&addr)
                        .await
                        .map_err(|e| BridgeError::Socket {
                            message: format!("Failed to bind to {}: {}", addr, e),
                        })?;
                // Report the real port when bound to port 0
                let bound = listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or(addr);
                (ListenUri::Tcp(bound), Listener::Tcp(listener))
            }
        };

        Ok(Self {
            uri,
            listener,
            drain_timeout: Duration::from_secs(crate::defaults::DRAIN_TIMEOUT_SECS),
        })
    }

    /// How long open connections get to finish after shutdown is requested.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// The address actually bound.
    pub fn uri(&self) -> &ListenUri {
        &self.uri
    }

    /// Accept connections until `shutdown` resolves, then drain.
    pub async fn serve<H, F>(self, handler: Arc<H>, shutdown: F) -> Result<()>
    where
        H: ConnectionHandler + 'static,
        F: Future<Output = ()>,
    {
        let Server {
            uri,
            listener,
            drain_timeout,
        } = self;

        tracing::info!(uri = %uri, "Listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        let mut next_id: u64 = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((reader, writer, peer)) => {
                        next_id += 1;
                        let connection = Connection {
                            id: next_id,
                            peer,
                            reader: BufReader::new(reader),
                            writer,
                            shutdown: shutdown_rx.clone(),
                        };
                        let handler = Arc::clone(&handler);
                        connections.spawn(async move {
                            let id = connection.id;
                            if let Err(e) = handler.handle(connection).await {
                                tracing::warn!(connection = id, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        // Typically fd exhaustion; keep serving the open connections
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished
                        && e.is_panic()
                    {
                        tracing::error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }

        drop(listener);
        let open = connections.len();
        tracing::info!(open, "Shutting down, draining connections");
        shutdown_tx.send_replace(true);

        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Drain period of {:?} elapsed, aborting connections",
                drain_timeout
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        if let ListenUri::Unix(path) = &uri
            && path.exists()
        {
            std::fs::remove_file(path).map_err(|e| BridgeError::Socket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}
