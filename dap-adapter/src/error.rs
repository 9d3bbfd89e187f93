// Adapter error taxonomy
//
// Nothing here is fatal to the process: every variant resolves to a failed
// DAP request or a terminated session.

use inspector_client::InspectorError;
use thiserror::Error;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Request name absent from the active state's dispatch table
    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    /// Request present in the table purely to fail with a clear message
    #[error("Request '{command}' is not valid here: {reason}")]
    IllegalRequest {
        command: String,
        reason: &'static str,
    },

    /// Failure during the connected state's install sequence
    #[error("Session install failed: {0}")]
    Install(String),

    /// The target rejected an evaluation or assignment
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown variables reference: {0}")]
    UnknownVariablesReference(i64),

    #[error("Target is not paused")]
    NotPaused,

    #[error(transparent)]
    Inspector(#[from] InspectorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = AdapterError::UnknownRequest("frobnicate".to_string());
        assert_eq!(err.to_string(), "Unknown request: frobnicate");

        let err = AdapterError::IllegalRequest {
            command: "launch".to_string(),
            reason: "session is already connected",
        };
        assert!(err.to_string().contains("launch"));
        assert!(err.to_string().contains("already connected"));
    }
}
