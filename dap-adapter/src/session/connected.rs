// Connected state: a live target behind the adapter
//
// Owns the install sequence that brings the session up, the dispatch table
// for a connected client, and the variable registry that scopes remote
// object handles to the current pause.

use crate::client::{continued_event, initialized_event, stopped_event, ClientChannel};
use crate::dispatch::{BuiltinCommand, DispatchTable};
use crate::error::{AdapterError, AdapterResult};
use crate::features::{DomainEnabler, Feature, RuntimeStarter};
use crate::protocol::{
    EvaluateArguments, ScopeBody, ScopesArguments, SetVariableArguments, StackFrameBody,
    StackTraceArguments, Variable, VariablesArguments,
};
use crate::variables::{
    InspectorBackend, PropertyFilter, ScopeContainer, VariableContainer, VariableRegistry,
};
use inspector_client::{CallFrame, EventMessage, PausedEvent, RemoteObject};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the target reported when it paused. Remote object handles are only
/// valid for the lifetime of this pause.
struct PauseContext {
    frames: Vec<CallFrame>,
    exception_reference: Option<i64>,
}

pub struct ConnectedState {
    dispatch: DispatchTable,
    registry: VariableRegistry,
    backend: Arc<dyn InspectorBackend>,
    domains: Arc<dyn DomainEnabler>,
    starter: Arc<dyn RuntimeStarter>,
    features: Vec<Arc<dyn Feature>>,
    client: Arc<dyn ClientChannel>,
    pause: Option<PauseContext>,
    installed: bool,
}

impl ConnectedState {
    pub fn new(
        backend: Arc<dyn InspectorBackend>,
        domains: Arc<dyn DomainEnabler>,
        starter: Arc<dyn RuntimeStarter>,
        features: Vec<Arc<dyn Feature>>,
        client: Arc<dyn ClientChannel>,
    ) -> Self {
        let dispatch = DispatchTable::new()
            .builtin("disconnect", BuiltinCommand::Disconnect)
            .builtin("configurationDone", BuiltinCommand::ConfigurationDone)
            .builtin("threads", BuiltinCommand::Threads)
            .builtin("stackTrace", BuiltinCommand::StackTrace)
            .builtin("scopes", BuiltinCommand::Scopes)
            .builtin("variables", BuiltinCommand::Variables)
            .builtin("setVariable", BuiltinCommand::SetVariable)
            .builtin("evaluate", BuiltinCommand::Evaluate)
            .illegal("initialize", "session is already initialized")
            .illegal("launch", "session is already connected to a target")
            .illegal("attach", "session is already connected to a target");

        Self {
            dispatch,
            registry: VariableRegistry::new(),
            backend,
            domains,
            starter,
            features,
            client,
            pause: None,
            installed: false,
        }
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Bring the session up. Order is load-bearing: domains must be active
    /// before any feature issues domain-scoped commands, features install
    /// sequentially in registration order, the target resumes only after
    /// every feature is ready, and the client hears "initialized" last.
    pub async fn install(&mut self) -> AdapterResult<()> {
        for feature in &self.features {
            self.dispatch.merge_declared(feature.command_handlers())?;
        }

        self.domains.enable_domains().await?;

        for feature in &self.features {
            debug!("Installing feature '{}'", feature.name());
            feature.install().await?;
        }

        self.starter.run_if_waiting_for_debugger().await?;

        self.client.send_event(initialized_event()).await;
        self.installed = true;

        info!("Session install complete");
        Ok(())
    }

    pub fn threads(&self) -> Value {
        // Script targets expose a single thread of execution
        json!({"threads": [{"id": 1, "name": "main"}]})
    }

    pub fn stack_trace(&self, arguments: Value) -> AdapterResult<Value> {
        let _args: StackTraceArguments = parse_arguments(arguments)?;
        let pause = self.pause.as_ref().ok_or(AdapterError::NotPaused)?;

        let frames: Vec<StackFrameBody> = pause
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| StackFrameBody {
                id: index as i64,
                name: if frame.function_name.is_empty() {
                    "<anonymous>".to_string()
                } else {
                    frame.function_name.clone()
                },
                line: frame.location.line_number + 1,
                column: frame.location.column_number.unwrap_or(0) + 1,
            })
            .collect();

        Ok(json!({"stackFrames": frames, "totalFrames": frames.len()}))
    }

    pub fn scopes(&mut self, arguments: Value) -> AdapterResult<Value> {
        let args: ScopesArguments = parse_arguments(arguments)?;
        let pause = self.pause.as_ref().ok_or(AdapterError::NotPaused)?;

        let frame = pause
            .frames
            .get(args.frame_id as usize)
            .ok_or_else(|| {
                AdapterError::InvalidArguments(format!("unknown frame id {}", args.frame_id))
            })?
            .clone();
        let exception_reference = pause.exception_reference;

        let mut scopes = Vec::with_capacity(frame.scope_chain.len() + 1);

        // A thrown value shows up ahead of the real scopes
        if args.frame_id == 0 {
            if let Some(reference) = exception_reference {
                scopes.push(ScopeBody {
                    name: "Exception".to_string(),
                    variables_reference: reference,
                    expensive: false,
                });
            }
        }

        for (index, scope) in frame.scope_chain.iter().enumerate() {
            let Some(handle) = scope.object.object_id.clone() else {
                continue;
            };

            // Synthetic bindings attach to the innermost scope only
            let (this_binding, return_value) = if index == 0 {
                (defined(&frame.this), frame.return_value.clone())
            } else {
                (None, None)
            };

            let reference = self.registry.register(VariableContainer::Scope(ScopeContainer {
                handle,
                call_frame_id: frame.call_frame_id.clone(),
                scope_index: index,
                this_binding,
                return_value,
            }));

            scopes.push(ScopeBody {
                name: scope_display_name(&scope.scope_type),
                variables_reference: reference,
                expensive: scope.scope_type == "global",
            });
        }

        Ok(json!({"scopes": scopes}))
    }

    pub async fn variables(&mut self, arguments: Value) -> AdapterResult<Value> {
        let args: VariablesArguments = parse_arguments(arguments)?;
        let filter = PropertyFilter::parse(args.filter.as_deref())?;

        let container = self.registry.get(args.variables_reference)?.clone();
        let backend = self.backend.clone();
        let entries = container
            .expand(backend.as_ref(), filter, args.start, args.count)
            .await?;

        let variables: Vec<Variable> = entries
            .into_iter()
            .map(|entry| {
                let reference = self.reference_for(&entry.value);
                Variable {
                    name: entry.name,
                    value: entry.value.preview_string(),
                    variables_reference: reference,
                }
            })
            .collect();

        Ok(json!({"variables": variables}))
    }

    pub async fn set_variable(&mut self, arguments: Value) -> AdapterResult<Value> {
        let args: SetVariableArguments = parse_arguments(arguments)?;

        let container = self.registry.get(args.variables_reference)?.clone();
        let backend = self.backend.clone();
        let confirmation = container
            .set_value(backend.as_ref(), &args.name, &args.value)
            .await?;

        Ok(json!({"value": confirmation}))
    }

    pub async fn evaluate(&mut self, arguments: Value) -> AdapterResult<Value> {
        let args: EvaluateArguments = parse_arguments(arguments)?;

        let call_frame_id = match args.frame_id {
            Some(frame_id) => {
                let pause = self.pause.as_ref().ok_or(AdapterError::NotPaused)?;
                let frame = pause.frames.get(frame_id as usize).ok_or_else(|| {
                    AdapterError::InvalidArguments(format!("unknown frame id {frame_id}"))
                })?;
                Some(frame.call_frame_id.clone())
            }
            None => None,
        };

        let backend = self.backend.clone();
        let result = backend
            .evaluate(&args.expression, call_frame_id.as_ref())
            .await?;

        let reference = self.reference_for(&result);
        Ok(json!({"result": result.preview_string(), "variablesReference": reference}))
    }

    /// Register a child container for an expandable value; 0 for leaves
    fn reference_for(&mut self, value: &RemoteObject) -> i64 {
        match &value.object_id {
            Some(handle) => self
                .registry
                .register(VariableContainer::properties(handle.clone())),
            None => 0,
        }
    }

    /// Route an instrumentation-protocol event into the adapter
    pub async fn handle_target_event(&mut self, event: EventMessage) {
        match event.method.as_str() {
            "Debugger.paused" => match serde_json::from_value::<PausedEvent>(event.params) {
                Ok(paused) => self.on_paused(paused).await,
                Err(e) => warn!("Malformed paused event: {}", e),
            },
            "Debugger.resumed" => self.on_resumed().await,
            other => debug!("Ignoring target event '{}'", other),
        }
    }

    async fn on_paused(&mut self, paused: PausedEvent) {
        // Handles from any previous pause are dead
        self.registry.clear();

        let description = paused.data.as_ref().map(|thrown| thrown.preview_string());
        let exception_reference = if paused.reason == "exception" {
            paused
                .data
                .clone()
                .map(|thrown| self.registry.register(VariableContainer::for_exception(thrown)))
        } else {
            None
        };

        let reason = match paused.reason.as_str() {
            "other" => "pause",
            reason => reason,
        }
        .to_string();

        self.pause = Some(PauseContext {
            frames: paused.call_frames,
            exception_reference,
        });

        self.client.send_event(stopped_event(&reason, description)).await;
    }

    async fn on_resumed(&mut self) {
        self.pause = None;
        self.registry.clear();
        self.client.send_event(continued_event()).await;
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &VariableRegistry {
        &self.registry
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: Value) -> AdapterResult<T> {
    serde_json::from_value(arguments)
        .map_err(|e| AdapterError::InvalidArguments(e.to_string()))
}

/// `this` is synthesized only when the frame actually has a binding
fn defined(this: &RemoteObject) -> Option<RemoteObject> {
    if this.object_type == "undefined" {
        None
    } else {
        Some(this.clone())
    }
}

fn scope_display_name(scope_type: &str) -> String {
    let mut chars = scope_type.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{log_of, new_log, RecordingClient, StubBackend};
    use crate::session::testing::{RecordingEnabler, RecordingStarter};
    use inspector_client::types::Location;
    use inspector_client::{PropertyDescriptor, ScopeDescriptor};
    use serde_json::json;
    use std::time::Duration;

    fn remote_handle(id: &str) -> RemoteObject {
        RemoteObject {
            object_type: "object".to_string(),
            object_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn descriptor(name: &str, value: RemoteObject) -> PropertyDescriptor {
        PropertyDescriptor {
            name: name.to_string(),
            value: Some(value),
            writable: Some(true),
            enumerable: true,
            own: true,
        }
    }

    fn frame(id: &str, scopes: Vec<ScopeDescriptor>) -> CallFrame {
        CallFrame {
            call_frame_id: id.to_string(),
            function_name: "work".to_string(),
            location: Location {
                script_id: "1".to_string(),
                line_number: 9,
                column_number: Some(4),
            },
            scope_chain: scopes,
            this: remote_handle("this-obj"),
            return_value: None,
        }
    }

    fn scope(scope_type: &str, handle: &str) -> ScopeDescriptor {
        ScopeDescriptor {
            scope_type: scope_type.to_string(),
            object: remote_handle(handle),
            name: None,
        }
    }

    fn state_with(
        backend: StubBackend,
    ) -> (
        ConnectedState,
        crate::session::testing::CallLog,
        Arc<StubBackend>,
    ) {
        let log = new_log();
        let backend = Arc::new(backend);
        let state = ConnectedState::new(
            backend.clone(),
            Arc::new(RecordingEnabler {
                log: log.clone(),
                delay: Duration::from_millis(0),
            }),
            Arc::new(RecordingStarter {
                log: log.clone(),
                delay: Duration::from_millis(0),
            }),
            Vec::new(),
            Arc::new(RecordingClient { log: log.clone() }),
        );
        (state, log, backend)
    }

    async fn pause_on_breakpoint(state: &mut ConnectedState) {
        let event = EventMessage {
            method: "Debugger.paused".to_string(),
            params: serde_json::to_value(json!({
                "callFrames": [{
                    "callFrameId": "frame-0",
                    "functionName": "work",
                    "location": {"scriptId": "1", "lineNumber": 9, "columnNumber": 4},
                    "scopeChain": [
                        {"type": "local", "object": {"type": "object", "objectId": "scope-local"}},
                        {"type": "global", "object": {"type": "object", "objectId": "scope-global"}}
                    ],
                    "this": {"type": "object", "objectId": "this-obj"}
                }],
                "reason": "breakpoint"
            }))
            .unwrap(),
        };
        state.handle_target_event(event).await;
    }

    #[tokio::test]
    async fn test_install_without_features_still_orders_steps() {
        let (mut state, log, _backend) = state_with(StubBackend::default());
        assert!(!state.is_installed());

        state.install().await.unwrap();

        assert!(state.is_installed());
        assert_eq!(log_of(&log), ["domains", "run", "event:initialized"]);
    }

    #[tokio::test]
    async fn test_paused_event_emits_stopped() {
        let (mut state, log, _backend) = state_with(StubBackend::default());
        pause_on_breakpoint(&mut state).await;

        assert_eq!(log_of(&log), ["event:stopped"]);
    }

    #[tokio::test]
    async fn test_stack_trace_from_pause() {
        let (mut state, _log, _backend) = state_with(StubBackend::default());
        pause_on_breakpoint(&mut state).await;

        let body = state.stack_trace(json!({"threadId": 1})).unwrap();
        assert_eq!(body["totalFrames"], 1);
        assert_eq!(body["stackFrames"][0]["name"], "work");
        // DAP lines/columns are 1-based, inspector's are 0-based
        assert_eq!(body["stackFrames"][0]["line"], 10);
        assert_eq!(body["stackFrames"][0]["column"], 5);
    }

    #[tokio::test]
    async fn test_stack_trace_requires_pause() {
        let (state, _log, _backend) = state_with(StubBackend::default());
        let result = state.stack_trace(json!({}));
        assert!(matches!(result, Err(AdapterError::NotPaused)));
    }

    #[tokio::test]
    async fn test_scopes_register_containers() {
        let (mut state, _log, _backend) = state_with(StubBackend::default());
        pause_on_breakpoint(&mut state).await;

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let scopes = body["scopes"].as_array().unwrap();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0]["name"], "Local");
        assert_eq!(scopes[1]["name"], "Global");
        assert_eq!(scopes[1]["expensive"], true);
        assert!(scopes[0]["variablesReference"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_scope_variables_include_this() {
        let backend = StubBackend {
            properties: vec![descriptor("x", RemoteObject::from_value(json!(7)))],
            ..Default::default()
        };
        let (mut state, _log, _backend) = state_with(backend);
        pause_on_breakpoint(&mut state).await;

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let local_ref = body["scopes"][0]["variablesReference"].as_i64().unwrap();

        let body = state
            .variables(json!({"variablesReference": local_ref}))
            .await
            .unwrap();
        let names: Vec<&str> = body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["this", "x"]);
    }

    #[tokio::test]
    async fn test_exception_pause_surfaces_exception_scope() {
        let (mut state, log, _backend) = state_with(StubBackend::default());

        let event = EventMessage {
            method: "Debugger.paused".to_string(),
            params: json!({
                "callFrames": [{
                    "callFrameId": "frame-0",
                    "functionName": "boom",
                    "location": {"scriptId": "1", "lineNumber": 2},
                    "scopeChain": [
                        {"type": "local", "object": {"type": "object", "objectId": "scope-local"}}
                    ],
                    "this": {"type": "undefined"}
                }],
                "reason": "exception",
                "data": {"type": "number", "value": 42, "description": "42"}
            }),
        };
        state.handle_target_event(event).await;
        assert_eq!(log_of(&log), ["event:stopped"]);

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let scopes = body["scopes"].as_array().unwrap();
        assert_eq!(scopes[0]["name"], "Exception");

        let exception_ref = scopes[0]["variablesReference"].as_i64().unwrap();
        let body = state
            .variables(json!({"variablesReference": exception_ref}))
            .await
            .unwrap();
        let variables = body["variables"].as_array().unwrap();
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0]["name"], "Exception");
        assert_eq!(variables[0]["value"], "42");
        assert_eq!(variables[0]["variablesReference"], 0);
    }

    #[tokio::test]
    async fn test_expandable_values_get_child_references() {
        let backend = StubBackend {
            properties: vec![
                descriptor("nested", remote_handle("child-1")),
                descriptor("leaf", RemoteObject::from_value(json!(1))),
            ],
            ..Default::default()
        };
        let (mut state, _log, _backend) = state_with(backend);
        pause_on_breakpoint(&mut state).await;

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let local_ref = body["scopes"][0]["variablesReference"].as_i64().unwrap();

        let body = state
            .variables(json!({"variablesReference": local_ref}))
            .await
            .unwrap();
        let variables = body["variables"].as_array().unwrap();

        let nested = variables.iter().find(|v| v["name"] == "nested").unwrap();
        assert!(nested["variablesReference"].as_i64().unwrap() > 0);

        let leaf = variables.iter().find(|v| v["name"] == "leaf").unwrap();
        assert_eq!(leaf["variablesReference"], 0);
    }

    #[tokio::test]
    async fn test_set_variable_routes_through_scope_address() {
        let (mut state, _log, backend) = state_with(StubBackend::default());
        pause_on_breakpoint(&mut state).await;

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let local_ref = body["scopes"][0]["variablesReference"].as_i64().unwrap();

        let body = state
            .set_variable(json!({
                "variablesReference": local_ref,
                "name": "x",
                "value": "41 + 1"
            }))
            .await
            .unwrap();
        assert_eq!(body["value"], "ok");

        let calls = backend.log.lock().unwrap().clone();
        assert_eq!(calls, ["scope frame-0#0 x=41 + 1"]);
    }

    #[tokio::test]
    async fn test_set_variable_routes_through_handle_address() {
        let backend = StubBackend {
            properties: vec![descriptor("nested", remote_handle("child-1"))],
            ..Default::default()
        };
        let (mut state, _log, backend) = state_with(backend);
        pause_on_breakpoint(&mut state).await;

        let body = state.scopes(json!({"frameId": 0})).unwrap();
        let local_ref = body["scopes"][0]["variablesReference"].as_i64().unwrap();
        let body = state
            .variables(json!({"variablesReference": local_ref}))
            .await
            .unwrap();
        let nested_ref = body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["name"] == "nested")
            .unwrap()["variablesReference"]
            .as_i64()
            .unwrap();

        state
            .set_variable(json!({
                "variablesReference": nested_ref,
                "name": "field",
                "value": "'v'"
            }))
            .await
            .unwrap();

        let calls = backend.log.lock().unwrap().clone();
        assert_eq!(calls.last().unwrap(), "property child-1 field='v'");
    }

    #[tokio::test]
    async fn test_resume_clears_registry() {
        let (mut state, log, _backend) = state_with(StubBackend::default());
        pause_on_breakpoint(&mut state).await;
        state.scopes(json!({"frameId": 0})).unwrap();
        assert!(!state.registry().is_empty());

        let event = EventMessage {
            method: "Debugger.resumed".to_string(),
            params: Value::Null,
        };
        state.handle_target_event(event).await;

        assert!(state.registry().is_empty());
        assert_eq!(log_of(&log), ["event:stopped", "event:continued"]);
    }

    #[tokio::test]
    async fn test_unknown_reference_fails() {
        let (mut state, _log, _backend) = state_with(StubBackend::default());
        let result = state.variables(json!({"variablesReference": 404})).await;
        assert!(matches!(
            result,
            Err(AdapterError::UnknownVariablesReference(404))
        ));
    }
}
