// inspector-dap - DAP debug adapter for V8-inspector-style runtimes
//
// Bridges a DAP client on stdio to a script runtime's inspector port

use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod client;
mod dispatch;
mod error;
mod features;
mod protocol;
mod session;
mod target;
mod transport;
mod variables;

use client::DapClientChannel;
use protocol::Request;
use session::terminating::SteppedTerminatingFactory;
use session::Session;
use target::{InspectorConnector, InspectorTeardown, TargetEvent};
use transport::{spawn_writer, DapReader};

/// Pump framed client messages into a channel; the channel closing means the
/// client transport is gone. Reading in its own task keeps the select loop
/// free of partially-read frames.
fn spawn_client_reader() -> mpsc::Receiver<Value> {
    let (tx, rx) = mpsc::channel::<Value>(16);

    tokio::spawn(async move {
        let mut reader = DapReader::new(tokio::io::stdin());
        loop {
            match reader.read_message().await {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    info!("Client closed the connection");
                    return;
                }
                Err(e) => {
                    error!("Client read error: {}", e);
                    return;
                }
            }
        }
    });

    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for the DAP protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("inspector_dap=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting inspector-dap adapter...");

    let mut requests = spawn_client_reader();
    let (outbound, writer_handle) = spawn_writer(tokio::io::stdout());

    let (target_tx, mut target_rx) = mpsc::channel::<TargetEvent>(64);
    let connection_slot = Arc::new(Mutex::new(None));

    let client = Arc::new(DapClientChannel::new(outbound.clone()));
    let mut session = Session::new(
        client.clone(),
        Arc::new(InspectorConnector::new(
            client,
            target_tx,
            connection_slot.clone(),
        )),
        Arc::new(SteppedTerminatingFactory::new(Arc::new(
            InspectorTeardown::new(connection_slot),
        ))),
    );

    info!("Adapter ready, waiting for requests...");

    // Single logical task: client requests and target events interleave here,
    // so state transitions never race
    loop {
        tokio::select! {
            message = requests.recv() => match message {
                Some(message) => match serde_json::from_value::<Request>(message) {
                    Ok(request) => {
                        let response = session.handle_request(&request).await;
                        let response = serde_json::to_value(&response)?;
                        if outbound.send(response).await.is_err() {
                            error!("Client connection lost");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Ignoring malformed request: {}", e);
                    }
                },
                None => {
                    session.transport_closed().await;
                    break;
                }
            },
            event = target_rx.recv() => match event {
                Some(TargetEvent::Notification(event)) => {
                    session.handle_target_event(event).await;
                }
                Some(TargetEvent::Closed) => {
                    session.transport_closed().await;
                }
                // Sender side gone; nothing left to forward
                None => break,
            },
        }

        if session.is_terminated() {
            break;
        }
    }

    info!("Adapter shutting down");

    drop(session);
    drop(outbound);
    writer_handle.await?;

    Ok(())
}
