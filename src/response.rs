use serde_json::Value;

use crate::errors::HarnessError;

/// Body of a decoded response: exactly one of the success or failure shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(Value),
}

/// Inbound response envelope.
///
/// The wire shape is a JSON object carrying exactly one of `result` /
/// `error`. Presence of the key decides the shape, not its value:
/// `{"result": null}` is a success ack (create/delete commands answer
/// exactly that). Servers derived from the ancestral protocol round-trip the
/// correlation id and a redundant `status` field; the id is kept for
/// traceability, anything else is ignored.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    correlation_id: Option<String>,
    body: ResponseBody,
}

impl CommandResponse {
    /// Decodes one wire line. Anything that is not an object with exactly
    /// one of the two envelope keys is a [`HarnessError::ProtocolViolation`].
    pub fn decode(line: &str) -> Result<Self, HarnessError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| HarnessError::protocol(format!("unparseable response: {e}")))?;

        let Value::Object(mut fields) = value else {
            return Err(HarnessError::protocol("response is not a JSON object"));
        };

        let correlation_id = match fields.remove("correlation_id") {
            Some(Value::String(id)) => Some(id),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(HarnessError::protocol(format!(
                    "correlation_id is not a string: {other}"
                )))
            }
        };

        let body = match (fields.remove("result"), fields.remove("error")) {
            (Some(result), None) => ResponseBody::Result(result),
            (None, Some(error)) => ResponseBody::Error(error),
            (Some(_), Some(_)) => {
                return Err(HarnessError::protocol(
                    "response carries both result and error",
                ))
            }
            (None, None) => {
                return Err(HarnessError::protocol(
                    "response carries neither result nor error",
                ))
            }
        };

        Ok(Self {
            correlation_id,
            body,
        })
    }

    /// Correlation id round-tripped by the server, when it sent one. The
    /// protocol matches positionally and does not require it.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Result(value) => Some(value),
            ResponseBody::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Result(_) => None,
            ResponseBody::Error(value) => Some(value),
        }
    }

    /// Resolves the envelope for `command`: the success payload, or the
    /// server's error payload verbatim as [`HarnessError::CommandRejected`].
    pub fn into_result(self, command: &str) -> Result<Value, HarnessError> {
        match self.body {
            ResponseBody::Result(value) => Ok(value),
            ResponseBody::Error(error) => Err(HarnessError::CommandRejected {
                command: command.to_string(),
                error,
            }),
        }
    }
}
