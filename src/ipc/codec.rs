//! Wyoming event framing over any ordered byte stream.
//!
//! A frame is one JSON header line, then `data_length` bytes of JSON data,
//! then `payload_length` bytes of payload. Older peers put `data` inline in
//! the header; both forms are accepted and merged.

use crate::defaults::{MAX_DATA_BYTES, MAX_HEADER_BYTES, MAX_PAYLOAD_BYTES, PROTOCOL_VERSION};
use crate::error::{BridgeError, Result};
use crate::ipc::protocol::RawEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Read the next frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames. Any error
/// leaves the stream at an unknown position, so callers must close it.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<RawEvent>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_HEADER_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| BridgeError::Socket {
                message: format!("Failed to read event header: {}", e),
            })?;

        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            if line.len() > MAX_HEADER_BYTES {
                return Err(BridgeError::Framing {
                    message: format!("event header exceeds {MAX_HEADER_BYTES} bytes"),
                });
            }
            return Err(BridgeError::Framing {
                message: "connection closed in the middle of an event header".to_string(),
            });
        }
        if line.iter().any(|b| !b.is_ascii_whitespace()) {
            break;
        }
        // Blank keep-alive line
    }

    let header: Header = serde_json::from_slice(&line).map_err(|e| BridgeError::Framing {
        message: format!("invalid event header: {}", e),
    })?;

    let mut data = header.data.unwrap_or_default();

    if let Some(len) = header.data_length.filter(|&len| len > 0) {
        if len > MAX_DATA_BYTES {
            return Err(BridgeError::Framing {
                message: format!("event data of {len} bytes exceeds {MAX_DATA_BYTES}"),
            });
        }
        let bytes = read_exact_bytes(reader, len, "data").await?;
        let extra: Map<String, Value> =
            serde_json::from_slice(&bytes).map_err(|e| BridgeError::Framing {
                message: format!("invalid event data: {}", e),
            })?;
        data.extend(extra);
    }

    let payload = match header.payload_length {
        Some(len) if len > MAX_PAYLOAD_BYTES => {
            return Err(BridgeError::Framing {
                message: format!("event payload of {len} bytes exceeds {MAX_PAYLOAD_BYTES}"),
            });
        }
        Some(len) => Some(read_exact_bytes(reader, len, "payload").await?),
        None => None,
    };

    Ok(Some(RawEvent {
        event_type: header.event_type,
        data,
        payload,
    }))
}

async fn read_exact_bytes<R>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => BridgeError::Framing {
                message: format!("connection closed before the full event {what} arrived"),
            },
            _ => BridgeError::Socket {
                message: format!("Failed to read event {what}: {}", e),
            },
        })?;
    Ok(buf)
}

/// Write one frame and flush it.
pub async fn write_event<W>(writer: &mut W, event: &RawEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data_bytes = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data).map_err(|e| {
            BridgeError::Other(format!("Failed to serialize event data: {e}"))
        })?)
    };

    let header = Header {
        event_type: event.event_type.clone(),
        data: None,
        data_length: data_bytes.as_ref().map(Vec::len),
        payload_length: event.payload.as_ref().map(Vec::len),
        version: Some(PROTOCOL_VERSION.to_string()),
    };
    let mut frame = serde_json::to_vec(&header)
        .map_err(|e| BridgeError::Other(format!("Failed to serialize event header: {e}")))?;
    frame.push(b'\n');
    if let Some(data) = &data_bytes {
        frame.extend_from_slice(data);
    }
    if let Some(payload) = &event.payload {
        frame.extend_from_slice(payload);
    }

    writer
        .write_all(&frame)
        .await
        .map_err(|e| BridgeError::Socket {
            message: format!("Failed to write event: {}", e),
        })?;

    writer.flush().await.map_err(|e| BridgeError::Socket {
        message: format!("Failed to flush writer: {}", e),
    })?;

    Ok(())
}
