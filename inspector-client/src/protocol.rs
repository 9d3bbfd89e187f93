// Inspector protocol message envelopes
//
// The inspector protocol is newline-delimited JSON. Outbound commands carry a
// client-assigned id; inbound traffic is either a reply (has an id) or an
// unsolicited event (has a method).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type InspectorResult<T> = Result<T, InspectorError>;

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Inspector error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Outbound command packet
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Reply to a command, correlated by id
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

/// Error body inside a failed reply
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

/// Unsolicited event from the target
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Inbound traffic is a reply or an event, discriminated by the id field
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Response(Response),
    Event(EventMessage),
}

impl Response {
    /// Unwrap the result, converting a protocol-level error body into
    /// `InspectorError::Remote`
    pub fn into_result(self) -> InspectorResult<Value> {
        if let Some(error) = self.error {
            return Err(InspectorError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}
