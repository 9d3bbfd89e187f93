// Per-state command dispatch table
//
// Each session state owns an immutable mapping from request command to
// handler, built at state entry. Unknown requests fail uniformly; entries can
// exist purely to produce a descriptive failure.

use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Commands executed by the state machine itself. These may transition
/// states, which is why they are not plain handler objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    Initialize,
    Launch,
    Attach,
    ConfigurationDone,
    Disconnect,
    Threads,
    StackTrace,
    Scopes,
    Variables,
    SetVariable,
    Evaluate,
}

/// Self-contained handler supplied by a command declarer (feature component)
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, arguments: Value) -> AdapterResult<Value>;
}

#[derive(Clone)]
pub enum HandlerEntry {
    Builtin(BuiltinCommand),
    Declared(Arc<dyn CommandHandler>),
    /// Always fails with this reason instead of an unknown-request error
    Illegal(&'static str),
}

/// What a successful lookup resolves to
#[derive(Clone)]
pub enum Resolution {
    Builtin(BuiltinCommand),
    Declared(Arc<dyn CommandHandler>),
}

#[derive(Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<String, HandlerEntry>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin(mut self, command: &str, builtin: BuiltinCommand) -> Self {
        self.entries
            .insert(command.to_string(), HandlerEntry::Builtin(builtin));
        self
    }

    pub fn illegal(mut self, command: &str, reason: &'static str) -> Self {
        self.entries
            .insert(command.to_string(), HandlerEntry::Illegal(reason));
        self
    }

    /// Merge handlers supplied by a declarer. A collision on a request name
    /// is a configuration error and surfaces as an install failure.
    pub fn merge_declared(
        &mut self,
        handlers: Vec<(String, Arc<dyn CommandHandler>)>,
    ) -> AdapterResult<()> {
        for (command, handler) in handlers {
            if self.entries.contains_key(&command) {
                return Err(AdapterError::Install(format!(
                    "duplicate handler declared for request '{command}'"
                )));
            }
            self.entries.insert(command, HandlerEntry::Declared(handler));
        }
        Ok(())
    }

    /// Resolve a request command against this table
    pub fn resolve(&self, command: &str) -> AdapterResult<Resolution> {
        match self.entries.get(command) {
            None => Err(AdapterError::UnknownRequest(command.to_string())),
            Some(HandlerEntry::Illegal(reason)) => Err(AdapterError::IllegalRequest {
                command: command.to_string(),
                reason,
            }),
            Some(HandlerEntry::Builtin(builtin)) => Ok(Resolution::Builtin(*builtin)),
            Some(HandlerEntry::Declared(handler)) => Ok(Resolution::Declared(handler.clone())),
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, arguments: Value) -> AdapterResult<Value> {
            Ok(arguments)
        }
    }

    #[test]
    fn test_unknown_request_fails_uniformly() {
        let table = DispatchTable::new().builtin("threads", BuiltinCommand::Threads);

        for command in ["frobnicate", "restart", ""] {
            match table.resolve(command) {
                Err(AdapterError::UnknownRequest(name)) => assert_eq!(name, command),
                other => panic!("expected unknown-request error, got {:?}", other.err()),
            }
        }
    }

    #[test]
    fn test_illegal_entry_produces_descriptive_failure() {
        let table = DispatchTable::new().illegal("launch", "session is already connected");

        match table.resolve("launch") {
            Err(AdapterError::IllegalRequest { command, reason }) => {
                assert_eq!(command, "launch");
                assert_eq!(reason, "session is already connected");
            }
            other => panic!("expected illegal-request error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_declared_handler_dispatch() {
        let mut table = DispatchTable::new();
        table
            .merge_declared(vec![("echo".to_string(), Arc::new(EchoHandler) as _)])
            .unwrap();

        let handler = match table.resolve("echo").unwrap() {
            Resolution::Declared(handler) => handler,
            Resolution::Builtin(_) => panic!("expected declared handler"),
        };

        let result = handler.handle(json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[test]
    fn test_merge_collision_is_config_error() {
        let mut table = DispatchTable::new().builtin("disconnect", BuiltinCommand::Disconnect);

        let result = table.merge_declared(vec![(
            "disconnect".to_string(),
            Arc::new(EchoHandler) as Arc<dyn CommandHandler>,
        )]);

        assert!(matches!(result, Err(AdapterError::Install(_))));
    }
}
