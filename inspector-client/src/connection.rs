// Inspector connection management
//
// Handles the TCP connection to the target runtime and command correlation

use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::protocol::{Command, EventMessage, InspectorResult};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct InspectorConnection {
    event_loop: EventLoopHandle,
    next_id: Arc<AtomicU64>,
}

impl InspectorConnection {
    /// Connect to a target runtime's inspector port
    pub async fn connect(host: &str, port: u16) -> InspectorResult<Self> {
        info!("Connecting to inspector at {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        let (reader, writer) = stream.into_split();

        Ok(Self::from_io(reader, writer))
    }

    /// Build a connection over an arbitrary read/write pair
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let event_loop = spawn_event_loop(reader, writer);

        Self {
            event_loop,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send a command and wait for its result payload
    pub async fn send_command(&self, method: &str, params: Value) -> InspectorResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("Sending {} id={}", method, id);

        let reply = self
            .event_loop
            .send_command(Command {
                id,
                method: method.to_string(),
                params,
            })
            .await?;

        reply.into_result()
    }

    /// Enable a protocol domain (e.g. "Runtime", "Debugger")
    pub async fn enable_domain(&self, domain: &str) -> InspectorResult<()> {
        self.send_command(&format!("{domain}.enable"), Value::Null)
            .await?;
        Ok(())
    }

    /// Wait for the next unsolicited event
    pub async fn recv_event(&self) -> Option<EventMessage> {
        self.event_loop.recv_event().await
    }

    /// Try to receive an event without waiting
    pub async fn try_recv_event(&self) -> Option<EventMessage> {
        self.event_loop.try_recv_event().await
    }

    /// Subscribe to the transport-closed notification
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.event_loop.closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InspectorError;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_send_command_unwraps_result() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client_io);
        let conn = InspectorConnection::from_io(r, w);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send_command("Runtime.evaluate", json!({"expression": "1+1"})).await }
        });

        let mut buf = vec![0u8; 1024];
        let n = server_io.read(&mut buf).await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(sent["id"], 1);

        server_io
            .write_all(b"{\"id\":1,\"result\":{\"result\":{\"type\":\"number\",\"value\":2}}}\n")
            .await
            .unwrap();

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["result"]["value"], 2);
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_as_remote() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client_io);
        let conn = InspectorConnection::from_io(r, w);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send_command("Runtime.getProperties", json!({"objectId": "gone"})).await }
        });

        let mut buf = vec![0u8; 1024];
        server_io.read(&mut buf).await.unwrap();
        server_io
            .write_all(b"{\"id\":1,\"error\":{\"code\":-32000,\"message\":\"Could not find object\"}}\n")
            .await
            .unwrap();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(InspectorError::Remote { code: -32000, .. })));
    }

    #[tokio::test]
    async fn test_command_ids_increment() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client_io);
        let conn = InspectorConnection::from_io(r, w);

        for expected in 1..=3u64 {
            let call = tokio::spawn({
                let conn = conn.clone();
                async move { conn.send_command("Debugger.resume", serde_json::Value::Null).await }
            });

            let mut buf = vec![0u8; 1024];
            let n = server_io.read(&mut buf).await.unwrap();
            let sent: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
            assert_eq!(sent["id"], expected);

            let reply = format!("{{\"id\":{expected},\"result\":{{}}}}\n");
            server_io.write_all(reply.as_bytes()).await.unwrap();
            call.await.unwrap().unwrap();
        }
    }
}
