//! Response types for the control protocol.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{JobErrorKind, ShellError};

/// A response from the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub success: bool,

    /// Unique identifier for this request/response pair.
    pub request_id: Uuid,

    /// Response data on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SERVICE_NOT_CONFIGURED", "STOP_TIMEOUT").
    pub code: String,

    /// Human-readable error message.
    pub message: String,

    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Response {
    /// Create a success response with a specific request ID.
    pub fn success_with_id(request_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            success: true,
            request_id,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response with a specific request ID.
    pub fn error_with_id(
        request_id: Uuid,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            request_id,
            data: None,
            error: Some(ErrorResponse::new(code, message)),
        }
    }

    /// Translate a failed operation into an error response.
    ///
    /// Stop failures list their individual causes and teardown failures the
    /// code and message of every service that failed.
    pub fn from_error(request_id: Uuid, err: &ShellError) -> Self {
        debug!(request_id = %request_id, code = err.code(), error = %err, "Error response");

        let mut response = Self::error_with_id(request_id, err.code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.details = error_details(err);
        }
        response
    }

    /// Error code, if this is a failure response.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

fn error_details(err: &ShellError) -> Option<serde_json::Value> {
    match err {
        ShellError::Job {
            name,
            kind: JobErrorKind::Stop { causes },
        } => Some(serde_json::json!({
            "service": name,
            "causes": causes.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "timed_out": causes.has_timeout(),
        })),
        ShellError::Teardown { failures } => Some(serde_json::json!({
            "failures": failures
                .iter()
                .map(|f| serde_json::json!({"code": f.code(), "message": f.to_string()}))
                .collect::<Vec<_>>(),
        })),
        _ => None,
    }
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}
