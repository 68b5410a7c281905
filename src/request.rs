use serde::Serialize;
use serde_json::Value;

use crate::errors::HarnessError;

/// Outbound command envelope.
///
/// Serialized as a single JSON text line:
/// `{"correlation_id": "...", "command": "...", "data": ...}`. `data` is
/// operation-specific and may be null.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    correlation_id: String,
    command: String,
    data: Option<Value>,
}

impl CommandRequest {
    pub fn new(correlation_id: String, command: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            correlation_id,
            command: command.into(),
            data,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Encodes the envelope into its wire line. An encoding failure is a
    /// caller bug (non-serializable data) and surfaces before anything is
    /// sent.
    pub fn encode(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string(self)?)
    }
}
