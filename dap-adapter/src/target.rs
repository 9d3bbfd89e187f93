// Inspector-backed collaborators
//
// Concrete implementations of the session's collaborator interfaces, wired
// over a live inspector connection: the variables backend, the connector
// that builds the connected state for launch/attach, and teardown.

use crate::client::ClientChannel;
use crate::error::{AdapterError, AdapterResult};
use crate::features::{
    BreakpointsFeature, Feature, InspectorDomainEnabler, InspectorRuntimeStarter, TeardownSteps,
};
use crate::session::connected::ConnectedState;
use crate::session::{Connector, LaunchKind};
use crate::variables::InspectorBackend;
use async_trait::async_trait;
use inspector_client::{
    CallArgument, CallFrameId, InspectorConnection, InspectorError, PropertyDescriptor,
    RemoteObject, RemoteObjectId,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Target-side notifications surfaced to the main loop
#[derive(Debug)]
pub enum TargetEvent {
    Notification(inspector_client::EventMessage),
    Closed,
}

/// Evaluation failures become request failures, transport faults stay fatal
fn evaluation_error(error: InspectorError) -> AdapterError {
    match error {
        InspectorError::Remote { message, .. } => AdapterError::Evaluation(message),
        other => AdapterError::Inspector(other),
    }
}

pub struct ConnectionBackend {
    connection: InspectorConnection,
}

impl ConnectionBackend {
    pub fn new(connection: InspectorConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl InspectorBackend for ConnectionBackend {
    async fn fetch_properties(
        &self,
        handle: &RemoteObjectId,
        start: Option<usize>,
        count: Option<usize>,
    ) -> AdapterResult<Vec<PropertyDescriptor>> {
        let properties = self.connection.get_properties(handle, true).await?;

        let from = start.unwrap_or(0).min(properties.len());
        let to = match count {
            Some(count) => (from + count).min(properties.len()),
            None => properties.len(),
        };

        Ok(properties[from..to].to_vec())
    }

    async fn assign_property(
        &self,
        handle: &RemoteObjectId,
        name: &str,
        value_expression: &str,
    ) -> AdapterResult<RemoteObject> {
        // Evaluate first so a bad expression fails before any mutation
        let new_value = self
            .connection
            .evaluate(value_expression)
            .await
            .map_err(evaluation_error)?;

        let assigned = self
            .connection
            .call_function_on(
                handle,
                "function(name, value) { this[name] = value; return this[name]; }",
                vec![
                    CallArgument {
                        value: Some(Value::String(name.to_string())),
                        ..Default::default()
                    },
                    CallArgument::from_remote_object(&new_value),
                ],
            )
            .await
            .map_err(evaluation_error)?;

        Ok(assigned)
    }

    async fn assign_scope_variable(
        &self,
        call_frame_id: &CallFrameId,
        scope_index: usize,
        name: &str,
        value_expression: &str,
    ) -> AdapterResult<RemoteObject> {
        let new_value = self
            .connection
            .evaluate_on_call_frame(call_frame_id, value_expression)
            .await
            .map_err(evaluation_error)?;

        self.connection
            .set_variable_value(
                scope_index,
                name,
                CallArgument::from_remote_object(&new_value),
                call_frame_id,
            )
            .await
            .map_err(evaluation_error)?;

        Ok(new_value)
    }

    async fn evaluate(
        &self,
        expression: &str,
        call_frame_id: Option<&CallFrameId>,
    ) -> AdapterResult<RemoteObject> {
        let result = match call_frame_id {
            Some(call_frame_id) => {
                self.connection
                    .evaluate_on_call_frame(call_frame_id, expression)
                    .await
            }
            None => self.connection.evaluate(expression).await,
        };

        result.map_err(evaluation_error)
    }
}

/// Shared slot for the live connection; empty until launch/attach succeeds
pub type ConnectionSlot = Arc<Mutex<Option<InspectorConnection>>>;

/// Builds the connected state for launch/attach requests and forwards
/// target events to the main loop.
pub struct InspectorConnector {
    client: Arc<dyn ClientChannel>,
    events: mpsc::Sender<TargetEvent>,
    slot: ConnectionSlot,
}

impl InspectorConnector {
    pub fn new(
        client: Arc<dyn ClientChannel>,
        events: mpsc::Sender<TargetEvent>,
        slot: ConnectionSlot,
    ) -> Self {
        Self {
            client,
            events,
            slot,
        }
    }
}

#[async_trait]
impl Connector for InspectorConnector {
    async fn connect(&self, kind: LaunchKind, arguments: Value) -> AdapterResult<ConnectedState> {
        let host = arguments["host"].as_str().unwrap_or("127.0.0.1").to_string();
        let port = match arguments["port"].as_u64() {
            Some(port) if port <= u16::MAX as u64 => port as u16,
            Some(port) => {
                return Err(AdapterError::InvalidArguments(format!(
                    "port {port} out of range"
                )))
            }
            None => 9229,
        };

        // A freshly launched target waits for the debugger; an attach target
        // is already running unless the client says otherwise
        let wait_for_debugger = arguments["waitForDebugger"]
            .as_bool()
            .unwrap_or(kind == LaunchKind::Launch);

        let connection = InspectorConnection::connect(&host, port).await?;
        info!("Connected to target at {}:{}", host, port);

        *self.slot.lock().unwrap() = Some(connection.clone());
        spawn_event_forwarder(connection.clone(), self.events.clone());

        let features: Vec<Arc<dyn Feature>> =
            vec![Arc::new(BreakpointsFeature::new(connection.clone()))];

        Ok(ConnectedState::new(
            Arc::new(ConnectionBackend::new(connection.clone())),
            Arc::new(InspectorDomainEnabler::new(connection.clone(), &features)),
            Arc::new(InspectorRuntimeStarter::new(connection, wait_for_debugger)),
            features,
            self.client.clone(),
        ))
    }
}

/// Pump inspector events and the closed notification into the main loop
fn spawn_event_forwarder(connection: InspectorConnection, events: mpsc::Sender<TargetEvent>) {
    tokio::spawn(async move {
        let mut closed = connection.subscribe_closed();

        loop {
            tokio::select! {
                event = connection.recv_event() => match event {
                    Some(event) => {
                        if events.send(TargetEvent::Notification(event)).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },
                _ = closed.changed() => break,
            }
        }

        debug!("Target transport closed, notifying session");
        events.send(TargetEvent::Closed).await.ok();
    });
}

/// Best-effort teardown: let the target run on before dropping the
/// connection. A transport that is already gone is not an error here.
pub struct InspectorTeardown {
    slot: ConnectionSlot,
}

impl InspectorTeardown {
    pub fn new(slot: ConnectionSlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl TeardownSteps for InspectorTeardown {
    async fn teardown(&self) -> AdapterResult<()> {
        let connection = self.slot.lock().unwrap().take();

        if let Some(connection) = connection {
            if let Err(e) = connection.resume().await {
                warn!("Could not resume target during teardown: {}", e);
            }
        }

        Ok(())
    }
}
