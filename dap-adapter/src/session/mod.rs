// Session lifecycle state machine
//
// One state is active at a time and owns the dispatch table for the requests
// legal in it. Transitions are one-directional:
//
//   Uninitialized -> Connected -> Terminating -> Terminated
//
// Teardown can be triggered by a client disconnect request or by transport
// loss; the two triggers are deduplicated so it runs at most once.

pub mod connected;
pub mod terminating;
pub mod uninitialized;

use crate::client::{terminated_event, ClientChannel};
use crate::dispatch::{BuiltinCommand, DispatchTable, Resolution};
use crate::error::{AdapterError, AdapterResult};
use crate::protocol::{Request, Response};
use async_trait::async_trait;
use connected::ConnectedState;
use inspector_client::EventMessage;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use terminating::{TerminatingFactory, TerminatingState};
use tracing::{debug, error, info};
use uninitialized::UninitializedState;

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked to disconnect
    ClientRequested,
    /// The target transport closed without a client request
    TransportClosed,
    /// Externally supplied cause
    Other(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientRequested => write!(f, "client requested disconnect"),
            Self::TransportClosed => write!(f, "target transport closed"),
            Self::Other(cause) => write!(f, "{cause}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    Launch,
    Attach,
}

/// Builds a connected state from validated launch/attach arguments. Wiring
/// of the concrete collaborators lives behind this seam.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, kind: LaunchKind, arguments: Value) -> AdapterResult<ConnectedState>;
}

/// Dedup flag for the two disconnect triggers. Set before the disconnect
/// handler first awaits; checked and cleared when the transport-close
/// notification arrives on the same logical task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectTrigger {
    Idle,
    DisconnectInFlight,
}

enum SessionState {
    Uninitialized(UninitializedState),
    Connected(ConnectedState),
    Terminating(TerminatingState),
    Terminated,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized(_) => "uninitialized",
            Self::Connected(_) => "connected",
            Self::Terminating(_) => "terminating",
            Self::Terminated => "terminated",
        }
    }
}

pub struct Session {
    state: SessionState,
    client: Arc<dyn ClientChannel>,
    connector: Arc<dyn Connector>,
    terminating_factory: Arc<dyn TerminatingFactory>,
    disconnect_trigger: DisconnectTrigger,
}

impl Session {
    pub fn new(
        client: Arc<dyn ClientChannel>,
        connector: Arc<dyn Connector>,
        terminating_factory: Arc<dyn TerminatingFactory>,
    ) -> Self {
        Self {
            state: SessionState::Uninitialized(UninitializedState::new()),
            client,
            connector,
            terminating_factory,
            disconnect_trigger: DisconnectTrigger::Idle,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated)
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Handle one client request against the active state's dispatch table
    pub async fn handle_request(&mut self, request: &Request) -> Response {
        debug!(
            "Request '{}' in state '{}'",
            request.command,
            self.state.name()
        );

        match self.dispatch(request).await {
            Ok(body) => Response::success(request, body),
            Err(e) => Response::error(request, e.to_string()),
        }
    }

    async fn dispatch(&mut self, request: &Request) -> AdapterResult<Option<Value>> {
        let table = self
            .active_table()
            .ok_or_else(|| AdapterError::UnknownRequest(request.command.clone()))?;

        match table.resolve(&request.command)? {
            Resolution::Declared(handler) => {
                Ok(Some(handler.handle(request.arguments.clone()).await?))
            }
            Resolution::Builtin(builtin) => self.execute(builtin, request).await,
        }
    }

    fn active_table(&self) -> Option<&DispatchTable> {
        match &self.state {
            SessionState::Uninitialized(state) => Some(state.dispatch()),
            SessionState::Connected(state) => Some(state.dispatch()),
            // No requests are legal once teardown has begun
            SessionState::Terminating(_) | SessionState::Terminated => None,
        }
    }

    async fn execute(
        &mut self,
        builtin: BuiltinCommand,
        request: &Request,
    ) -> AdapterResult<Option<Value>> {
        let arguments = request.arguments.clone();
        match builtin {
            BuiltinCommand::Initialize => {
                let SessionState::Uninitialized(state) = &mut self.state else {
                    return Err(AdapterError::IllegalRequest {
                        command: "initialize".to_string(),
                        reason: "session is already initialized",
                    });
                };
                Ok(Some(state.initialize(arguments)))
            }
            BuiltinCommand::Launch => self.connect_target(LaunchKind::Launch, arguments).await,
            BuiltinCommand::Attach => self.connect_target(LaunchKind::Attach, arguments).await,
            BuiltinCommand::Disconnect => {
                // Set before the first await: the teardown below may close
                // the target transport, and that close must be absorbed.
                self.disconnect_trigger = DisconnectTrigger::DisconnectInFlight;
                self.begin_teardown(DisconnectReason::ClientRequested).await?;
                Ok(None)
            }
            BuiltinCommand::ConfigurationDone => Ok(None),
            BuiltinCommand::Threads => Ok(Some(self.connected_mut(&request.command)?.threads())),
            BuiltinCommand::StackTrace => {
                let state = self.connected_mut(&request.command)?;
                state.stack_trace(arguments).map(Some)
            }
            BuiltinCommand::Scopes => {
                let state = self.connected_mut(&request.command)?;
                state.scopes(arguments).map(Some)
            }
            BuiltinCommand::Variables => {
                let state = self.connected_mut(&request.command)?;
                state.variables(arguments).await.map(Some)
            }
            BuiltinCommand::SetVariable => {
                let state = self.connected_mut(&request.command)?;
                state.set_variable(arguments).await.map(Some)
            }
            BuiltinCommand::Evaluate => {
                let state = self.connected_mut(&request.command)?;
                state.evaluate(arguments).await.map(Some)
            }
        }
    }

    async fn connect_target(
        &mut self,
        kind: LaunchKind,
        arguments: Value,
    ) -> AdapterResult<Option<Value>> {
        let connected = self.connector.connect(kind, arguments).await?;

        // Enter the connected state before installing: even a failed install
        // must leave the session terminable via disconnect.
        self.state = SessionState::Connected(connected);

        let result = match &mut self.state {
            SessionState::Connected(state) => state.install().await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                info!("Session connected");
                Ok(None)
            }
            Err(e) => {
                error!("Install failed: {}", e);
                Err(e)
            }
        }
    }

    fn connected_mut(&mut self, command: &str) -> AdapterResult<&mut ConnectedState> {
        match &mut self.state {
            SessionState::Connected(state) => Ok(state),
            _ => Err(AdapterError::IllegalRequest {
                command: command.to_string(),
                reason: "no connected session",
            }),
        }
    }

    /// Unsolicited transport-close notification. Absorbed when a client
    /// disconnect already owns teardown, otherwise treated as target loss.
    pub async fn transport_closed(&mut self) {
        if self.disconnect_trigger == DisconnectTrigger::DisconnectInFlight {
            self.disconnect_trigger = DisconnectTrigger::Idle;
            debug!("Transport close consumed by in-flight disconnect");
            return;
        }

        if let Err(e) = self.begin_teardown(DisconnectReason::TransportClosed).await {
            error!("Teardown after transport loss failed: {}", e);
        }
    }

    /// Externally triggered disconnect (e.g. a feature detecting a dead
    /// target)
    pub async fn disconnect(&mut self, reason: DisconnectReason) -> AdapterResult<()> {
        self.begin_teardown(reason).await
    }

    /// Route an instrumentation-protocol event to the connected state
    pub async fn handle_target_event(&mut self, event: EventMessage) {
        if let SessionState::Connected(state) = &mut self.state {
            state.handle_target_event(event).await;
        } else {
            debug!(
                "Dropping target event '{}' in state '{}'",
                event.method,
                self.state.name()
            );
        }
    }

    /// Run teardown at most once, whatever triggered it
    async fn begin_teardown(&mut self, reason: DisconnectReason) -> AdapterResult<()> {
        if matches!(
            self.state,
            SessionState::Terminating(_) | SessionState::Terminated
        ) {
            debug!("Teardown already ran, ignoring trigger: {}", reason);
            return Ok(());
        }

        info!("Tearing down session: {}", reason);

        let terminating = self.terminating_factory.create(reason);
        self.state = SessionState::Terminating(terminating);

        let result = match &mut self.state {
            SessionState::Terminating(state) => state.install().await,
            _ => Ok(()),
        };

        self.client.send_event(terminated_event()).await;
        self.state = SessionState::Terminated;

        result
    }
}
