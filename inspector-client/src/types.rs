// Inspector type definitions
//
// Common types shared by the Runtime and Debugger domains

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque handle to a live object in the target runtime. Only valid within
/// the execution context that produced it.
pub type RemoteObjectId = String;

/// Identifies a call frame while the target is paused
pub type CallFrameId = String;

/// Mirror of a value or object in the target runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

impl RemoteObject {
    /// Wrap a plain JSON value as a by-value remote object
    pub fn from_value(value: Value) -> Self {
        let object_type = match &value {
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            _ => "object",
        };

        Self {
            object_type: object_type.to_string(),
            value: Some(value),
            ..Default::default()
        }
    }

    /// One-line rendering for client display
    pub fn preview_string(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        if let Some(value) = &self.value {
            return match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
        if let Some(class_name) = &self.class_name {
            return class_name.clone();
        }
        self.object_type.clone()
    }
}

/// One property of a remote object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RemoteObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
    #[serde(default)]
    pub enumerable: bool,
    #[serde(default)]
    pub own: bool,
}

/// Variable binding scope of a paused call frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDescriptor {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub object: RemoteObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Code location in a parsed script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<i64>,
}

/// Call frame of a paused target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: CallFrameId,
    pub function_name: String,
    pub location: Location,
    pub scope_chain: Vec<ScopeDescriptor>,
    pub this: RemoteObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<RemoteObject>,
}

/// Details of a thrown exception
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<RemoteObject>,
}

/// Argument to Runtime.callFunctionOn: by value or by handle
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

impl CallArgument {
    pub fn from_remote_object(object: &RemoteObject) -> Self {
        match &object.object_id {
            Some(id) => Self {
                object_id: Some(id.clone()),
                ..Default::default()
            },
            None => Self {
                value: object.value.clone(),
                ..Default::default()
            },
        }
    }
}
