//! Request type for the control protocol.

use serde::{Deserialize, Serialize};

/// A control request from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The command to execute (e.g., "service.start", "config.full").
    pub command: String,

    /// Command parameters as a JSON object.
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: empty_params(),
        }
    }

    /// Add a parameter to the request (builder pattern).
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some(obj) = self.params.as_object_mut() {
            obj.insert(key.to_string(), value.into());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_default_to_empty_object() {
        let request: Request = serde_json::from_str(r#"{"command":"service.list"}"#).unwrap();
        assert_eq!(request.command, "service.list");
        assert!(request.params.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_with_param() {
        let request = Request::new("service.start").with_param("service", "wm");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["params"]["service"], "wm");
    }
}
