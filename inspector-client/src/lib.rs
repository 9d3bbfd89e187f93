// Inspector protocol client library for script debugging
//
// Implements the subset of the inspector protocol the adapter needs:
// - Connection management and command/reply correlation
// - Event delivery and transport-closed notification
// - Runtime domain: object inspection and evaluation
// - Debugger domain: execution control and scope mutation

pub mod connection;
pub mod debugger;
pub mod eventloop;
pub mod protocol;
pub mod runtime;
pub mod types;

pub use connection::InspectorConnection;
pub use debugger::PausedEvent;
pub use protocol::{EventMessage, InspectorError, InspectorResult};
pub use types::{
    CallArgument, CallFrame, CallFrameId, PropertyDescriptor, RemoteObject, RemoteObjectId,
    ScopeDescriptor,
};
