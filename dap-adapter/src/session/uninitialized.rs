// Uninitialized state: the session before a target is connected
//
// Offers initialize (capability exchange, no transition) and launch/attach
// (which the machine turns into the connected state). Disconnect is legal
// and simply tears down an empty session.

use crate::dispatch::{BuiltinCommand, DispatchTable};
use crate::protocol::Capabilities;
use serde_json::Value;
use tracing::debug;

pub struct UninitializedState {
    dispatch: DispatchTable,
    client_info: Option<Value>,
}

impl UninitializedState {
    pub fn new() -> Self {
        let dispatch = DispatchTable::new()
            .builtin("initialize", BuiltinCommand::Initialize)
            .builtin("launch", BuiltinCommand::Launch)
            .builtin("attach", BuiltinCommand::Attach)
            .builtin("disconnect", BuiltinCommand::Disconnect);

        Self {
            dispatch,
            client_info: None,
        }
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Record client info and advertise adapter capabilities
    pub fn initialize(&mut self, arguments: Value) -> Value {
        debug!("Client initialized: {}", arguments);
        self.client_info = Some(arguments);

        serde_json::to_value(Capabilities {
            supports_configuration_done_request: true,
            supports_set_variable: true,
            supports_conditional_breakpoints: false,
        })
        .unwrap()
    }

    pub fn client_info(&self) -> Option<&Value> {
        self.client_info.as_ref()
    }
}

impl Default for UninitializedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offered_requests() {
        let state = UninitializedState::new();
        let mut commands: Vec<&str> = state.dispatch().commands().collect();
        commands.sort_unstable();
        assert_eq!(commands, ["attach", "disconnect", "initialize", "launch"]);
    }

    #[test]
    fn test_initialize_records_client_info() {
        let mut state = UninitializedState::new();
        assert!(state.client_info().is_none());

        let capabilities = state.initialize(json!({"clientID": "vscode"}));
        assert_eq!(capabilities["supportsSetVariable"], true);
        assert_eq!(
            state.client_info().unwrap()["clientID"],
            "vscode"
        );
    }
}
