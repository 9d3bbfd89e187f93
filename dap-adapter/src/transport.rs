// DAP wire framing
//
// DAP messages travel as Content-Length framed JSON over stdio. The writer
// runs as its own task and owns outgoing sequence numbers.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub struct DapReader<R> {
    reader: BufReader<R>,
}

impl<R: tokio::io::AsyncRead + Unpin> DapReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read one framed message. Returns None when the client closed the
    /// connection.
    pub async fn read_message(&mut self) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line).await?;
            if read_n == 0 {
                return Ok(None);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse()?);
            }
        }

        let length = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

        let mut payload = vec![0u8; length];
        self.reader.read_exact(&mut payload).await?;

        let message: Value = serde_json::from_slice(&payload)?;
        debug!("Received: {}", message);
        Ok(Some(message))
    }
}

/// Spawn the writer task. Messages sent to the returned channel are framed,
/// stamped with the next sequence number, and flushed in order.
pub fn spawn_writer<W>(mut writer: W) -> (mpsc::Sender<Value>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Value>(64);

    let handle = tokio::spawn(async move {
        let mut seq: i64 = 1;

        while let Some(mut message) = rx.recv().await {
            message["seq"] = json!(seq);
            seq += 1;

            let payload = match serde_json::to_vec(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode outgoing message: {}", e);
                    continue;
                }
            };

            let header = format!("Content-Length: {}\r\n\r\n", payload.len());
            if writer.write_all(header.as_bytes()).await.is_err()
                || writer.write_all(&payload).await.is_err()
                || writer.flush().await.is_err()
            {
                error!("Client connection lost while writing");
                break;
            }
        }
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_framed_message() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let mut reader = DapReader::new(client_io);

        let payload = br#"{"seq":1,"type":"request","command":"threads"}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", payload.len());
        server_io.write_all(framed.as_bytes()).await.unwrap();
        server_io.write_all(payload).await.unwrap();

        let message = reader.read_message().await.unwrap().unwrap();
        assert_eq!(message["command"], "threads");
    }

    #[tokio::test]
    async fn test_eof_yields_none() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let mut reader = DapReader::new(client_io);

        drop(server_io);
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_header_is_an_error() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let mut reader = DapReader::new(client_io);

        server_io.write_all(b"\r\n").await.unwrap();
        assert!(reader.read_message().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_frames_and_sequences() {
        let (server_io, client_io) = tokio::io::duplex(1024);
        let (tx, handle) = spawn_writer(server_io);

        tx.send(json!({"type": "event", "event": "initialized"}))
            .await
            .unwrap();
        tx.send(json!({"type": "event", "event": "terminated"}))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        let mut reader = DapReader::new(client_io);
        let first = reader.read_message().await.unwrap().unwrap();
        assert_eq!(first["seq"], 1);
        assert_eq!(first["event"], "initialized");

        let second = reader.read_message().await.unwrap().unwrap();
        assert_eq!(second["seq"], 2);
        assert_eq!(second["event"], "terminated");
    }
}
