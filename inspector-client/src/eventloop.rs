// Inspector event loop
//
// Single task multiplexing outbound commands and inbound replies/events over
// one connection. Replies route to the waiting caller by id; events are
// queued for the session to consume. Transport loss flips the closed watch.

use crate::protocol::{
    Command, EventMessage, InboundMessage, InspectorError, InspectorResult, Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Request to send a command and get its reply
pub struct CommandRequest {
    pub command: Command,
    pub reply_tx: oneshot::Sender<InspectorResult<Response>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventMessage>>>,
    closed_rx: watch::Receiver<bool>,
}

impl EventLoopHandle {
    /// Send a command and wait for its reply
    pub async fn send_command(&self, command: Command) -> InspectorResult<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { command, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| InspectorError::ConnectionClosed)?;

        reply_rx
            .await
            .map_err(|_| InspectorError::ConnectionClosed)?
    }

    /// Wait for the next event
    pub async fn recv_event(&self) -> Option<EventMessage> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Try to receive an event without waiting
    pub async fn try_recv_event(&self) -> Option<EventMessage> {
        let mut rx = self.event_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Subscribe to the transport-closed notification. The watch value flips
    /// to true exactly once, when the connection is lost.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }
}

/// Start the event loop task over any read/write pair
pub fn spawn_event_loop<R, W>(reader: R, writer: W) -> EventLoopHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    // Events carry pause/resume notifications and shouldn't be dropped
    let (event_tx, event_rx) = mpsc::channel(256);
    let (closed_tx, closed_rx) = watch::channel(false);

    tokio::spawn(event_loop_task(
        reader, writer, command_rx, event_tx, closed_tx,
    ));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        closed_rx,
    }
}

async fn event_loop_task<R, W>(
    reader: R,
    mut writer: W,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: mpsc::Sender<EventMessage>,
    closed_tx: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("Inspector event loop started");

    let mut reader = BufReader::new(reader);
    let mut pending_replies: HashMap<u64, oneshot::Sender<InspectorResult<Response>>> =
        HashMap::new();
    // Inbound line buffer. Cleared only after a complete line is processed:
    // read_until keeps partially-read bytes appended here when the command
    // branch wins the select, so a reply split across reads is not lost.
    let mut line: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            // Outgoing commands
            Some(request) = command_rx.recv() => {
                let id = request.command.id;
                debug!("Sending command id={} method={}", id, request.command.method);

                let mut encoded = match serde_json::to_vec(&request.command) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        request.reply_tx.send(Err(InspectorError::Serde(e))).ok();
                        continue;
                    }
                };
                encoded.push(b'\n');

                if let Err(e) = writer.write_all(&encoded).await {
                    error!("Failed to write command: {}", e);
                    request.reply_tx.send(Err(InspectorError::Io(e))).ok();
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Failed to flush command: {}", e);
                    request.reply_tx.send(Err(InspectorError::Io(e))).ok();
                    break;
                }

                pending_replies.insert(id, request.reply_tx);
            }

            // Incoming replies and events
            result = reader.read_until(b'\n', &mut line) => {
                match result {
                    Ok(0) => {
                        info!("Inspector transport closed by peer");
                        break;
                    }
                    Ok(_) => {
                        {
                            let text = String::from_utf8_lossy(&line);
                            let trimmed = text.trim();
                            if !trimmed.is_empty() {
                                match serde_json::from_str::<InboundMessage>(trimmed) {
                                    Ok(InboundMessage::Response(response)) => {
                                        debug!("Received reply id={}", response.id);
                                        if let Some(tx) = pending_replies.remove(&response.id) {
                                            tx.send(Ok(response)).ok();
                                        } else {
                                            warn!("Reply for unknown command id={}", response.id);
                                        }
                                    }
                                    Ok(InboundMessage::Event(event)) => {
                                        debug!("Received event {}", event.method);
                                        match event_tx.try_send(event) {
                                            Ok(()) => {}
                                            Err(mpsc::error::TrySendError::Full(event)) => {
                                                error!("Event queue full, dropping {}", event.method);
                                            }
                                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                                warn!("Event receiver dropped");
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Unparseable inspector message: {}", e);
                                    }
                                }
                            }
                        }
                        line.clear();
                    }
                    Err(e) => {
                        error!("Failed to read from inspector: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Fail anything still waiting, then signal closure
    for (_, tx) in pending_replies.drain() {
        tx.send(Err(InspectorError::ConnectionClosed)).ok();
    }
    closed_tx.send(true).ok();

    info!("Inspector event loop shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reply_routing_by_id() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let handle = spawn_event_loop(client_r, client_w);

        let send = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .send_command(Command {
                        id: 1,
                        method: "Runtime.enable".to_string(),
                        params: Value::Null,
                    })
                    .await
            }
        });

        // Read the command off the wire, then reply
        let mut buf = vec![0u8; 1024];
        let n = server_io.read(&mut buf).await.unwrap();
        let sent: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(sent["method"], "Runtime.enable");

        tokio::io::AsyncWriteExt::write_all(
            &mut server_io,
            b"{\"id\":1,\"result\":{}}\n",
        )
        .await
        .unwrap();

        let reply = send.await.unwrap().unwrap();
        assert_eq!(reply.id, 1);
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn test_split_reply_survives_interleaved_command() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let handle = spawn_event_loop(client_r, client_w);

        let first = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .send_command(Command {
                        id: 1,
                        method: "Runtime.evaluate".to_string(),
                        params: json!({"expression": "slow()"}),
                    })
                    .await
            }
        });

        let mut buf = vec![0u8; 1024];
        server_io.read(&mut buf).await.unwrap();

        // Reply 1 arrives in two chunks; between them a second command wakes
        // the outgoing branch of the loop
        tokio::io::AsyncWriteExt::write_all(&mut server_io, b"{\"id\":1,\"result\":{\"v\":")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let second = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .send_command(Command {
                        id: 2,
                        method: "Debugger.resume".to_string(),
                        params: Value::Null,
                    })
                    .await
            }
        });

        let mut buf = vec![0u8; 1024];
        server_io.read(&mut buf).await.unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut server_io, b"1}}\n{\"id\":2,\"result\":{}}\n")
            .await
            .unwrap();

        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply.id, 1);
        assert_eq!(reply.result.unwrap(), json!({"v": 1}));

        let reply = second.await.unwrap().unwrap();
        assert_eq!(reply.id, 2);
    }

    #[tokio::test]
    async fn test_event_delivery() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let handle = spawn_event_loop(client_r, client_w);

        tokio::io::AsyncWriteExt::write_all(
            &mut server_io,
            b"{\"method\":\"Debugger.paused\",\"params\":{\"reason\":\"breakpoint\"}}\n",
        )
        .await
        .unwrap();

        let event = handle.recv_event().await.unwrap();
        assert_eq!(event.method, "Debugger.paused");
        assert_eq!(event.params, json!({"reason": "breakpoint"}));
    }

    #[tokio::test]
    async fn test_closed_watch_flips_on_eof() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let handle = spawn_event_loop(client_r, client_w);

        let mut closed = handle.closed();
        assert!(!*closed.borrow());

        drop(server_io);

        closed.changed().await.unwrap();
        assert!(*closed.borrow());
    }

    #[tokio::test]
    async fn test_pending_reply_fails_on_close() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let handle = spawn_event_loop(client_r, client_w);

        let send = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .send_command(Command {
                        id: 9,
                        method: "Runtime.evaluate".to_string(),
                        params: json!({"expression": "1"}),
                    })
                    .await
            }
        });

        // Consume the command, then drop the connection without replying
        let mut buf = vec![0u8; 1024];
        server_io.read(&mut buf).await.unwrap();
        drop(server_io);

        let result = send.await.unwrap();
        assert!(matches!(result, Err(InspectorError::ConnectionClosed)));
    }
}
