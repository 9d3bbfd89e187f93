// Debugger domain command implementations
//
// Execution control and paused-state inspection

use crate::connection::InspectorConnection;
use crate::protocol::{InspectorError, InspectorResult};
use crate::types::{CallArgument, CallFrame, CallFrameId, ExceptionDetails, RemoteObject};
use serde::Deserialize;
use serde_json::{json, Value};

/// Payload of a Debugger.paused event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
    /// For pause reason "exception", the thrown value
    #[serde(default)]
    pub data: Option<RemoteObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateOnCallFrameReply {
    result: RemoteObject,
    #[serde(default)]
    exception_details: Option<ExceptionDetails>,
}

impl InspectorConnection {
    /// Resume script execution (Debugger.resume)
    pub async fn resume(&self) -> InspectorResult<()> {
        self.send_command("Debugger.resume", Value::Null).await?;
        Ok(())
    }

    /// Pause script execution at the next opportunity (Debugger.pause)
    pub async fn pause(&self) -> InspectorResult<()> {
        self.send_command("Debugger.pause", Value::Null).await?;
        Ok(())
    }

    /// Evaluate an expression on a paused call frame
    pub async fn evaluate_on_call_frame(
        &self,
        call_frame_id: &CallFrameId,
        expression: &str,
    ) -> InspectorResult<RemoteObject> {
        let result = self
            .send_command(
                "Debugger.evaluateOnCallFrame",
                json!({
                    "callFrameId": call_frame_id,
                    "expression": expression,
                }),
            )
            .await?;

        let reply: EvaluateOnCallFrameReply = serde_json::from_value(result)?;
        if let Some(details) = reply.exception_details {
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

        Ok(reply.result)
    }

    /// Mutate a variable in a call-frame scope (Debugger.setVariableValue).
    /// Addresses the frame/scope pair, not an object handle.
    pub async fn set_variable_value(
        &self,
        scope_number: usize,
        variable_name: &str,
        new_value: CallArgument,
        call_frame_id: &CallFrameId,
    ) -> InspectorResult<()> {
        self.send_command(
            "Debugger.setVariableValue",
            json!({
                "scopeNumber": scope_number,
                "variableName": variable_name,
                "newValue": new_value,
                "callFrameId": call_frame_id,
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_event_parse() {
        let event: PausedEvent = serde_json::from_value(json!({
            "callFrames": [{
                "callFrameId": "frame-0",
                "functionName": "main",
                "location": {"scriptId": "12", "lineNumber": 4},
                "scopeChain": [
                    {"type": "local", "object": {"type": "object", "objectId": "scope-0"}},
                    {"type": "global", "object": {"type": "object", "objectId": "scope-g"}}
                ],
                "this": {"type": "undefined"}
            }],
            "reason": "breakpoint"
        }))
        .unwrap();

        assert_eq!(event.reason, "breakpoint");
        assert_eq!(event.call_frames.len(), 1);
        let frame = &event.call_frames[0];
        assert_eq!(frame.function_name, "main");
        assert_eq!(frame.scope_chain[0].scope_type, "local");
        assert!(frame.return_value.is_none());
    }

    #[test]
    fn test_paused_event_with_exception_data() {
        let event: PausedEvent = serde_json::from_value(json!({
            "callFrames": [],
            "reason": "exception",
            "data": {"type": "number", "value": 42, "description": "42"}
        }))
        .unwrap();

        let thrown = event.data.unwrap();
        assert!(thrown.object_id.is_none());
        assert_eq!(thrown.value, Some(json!(42)));
    }
}
