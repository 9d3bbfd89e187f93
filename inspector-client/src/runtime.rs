// Runtime domain command implementations
//
// Object inspection and evaluation against the target runtime

use crate::connection::InspectorConnection;
use crate::protocol::{InspectorError, InspectorResult};
use crate::types::{CallArgument, ExceptionDetails, PropertyDescriptor, RemoteObject, RemoteObjectId};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPropertiesReply {
    result: Vec<PropertyDescriptor>,
    #[serde(default)]
    exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateReply {
    result: RemoteObject,
    #[serde(default)]
    exception_details: Option<ExceptionDetails>,
}

fn check_exception(details: Option<ExceptionDetails>) -> InspectorResult<()> {
    if let Some(details) = details {
        let message = details
            .exception
            .as_ref()
            .map(|e| e.preview_string())
            .unwrap_or(details.text);
        return Err(InspectorError::Remote {
            code: -32000,
            message,
        });
    }
    Ok(())
}

impl InspectorConnection {
    /// Fetch the properties of an object (Runtime.getProperties)
    pub async fn get_properties(
        &self,
        object_id: &RemoteObjectId,
        own_properties: bool,
    ) -> InspectorResult<Vec<PropertyDescriptor>> {
        let result = self
            .send_command(
                "Runtime.getProperties",
                json!({
                    "objectId": object_id,
                    "ownProperties": own_properties,
                }),
            )
            .await?;

        let reply: GetPropertiesReply = serde_json::from_value(result)?;
        check_exception(reply.exception_details)?;

        Ok(reply.result)
    }

    /// Evaluate an expression in the global context (Runtime.evaluate)
    pub async fn evaluate(&self, expression: &str) -> InspectorResult<RemoteObject> {
        let result = self
            .send_command("Runtime.evaluate", json!({"expression": expression}))
            .await?;

        let reply: EvaluateReply = serde_json::from_value(result)?;
        check_exception(reply.exception_details)?;

        Ok(reply.result)
    }

    /// Call a function with an object as `this` (Runtime.callFunctionOn)
    pub async fn call_function_on(
        &self,
        object_id: &RemoteObjectId,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
    ) -> InspectorResult<RemoteObject> {
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "arguments": arguments,
                }),
            )
            .await?;

        let reply: EvaluateReply = serde_json::from_value(result)?;
        check_exception(reply.exception_details)?;

        Ok(reply.result)
    }

    /// Resume a target started in wait-for-debugger mode. No-op when the
    /// target is already running.
    pub async fn run_if_waiting_for_debugger(&self) -> InspectorResult<()> {
        self.send_command("Runtime.runIfWaitingForDebugger", Value::Null)
            .await?;
        Ok(())
    }

    /// Release a remote object handle (Runtime.releaseObject)
    pub async fn release_object(&self, object_id: &RemoteObjectId) -> InspectorResult<()> {
        self.send_command("Runtime.releaseObject", json!({"objectId": object_id}))
            .await?;
        Ok(())
    }
}
