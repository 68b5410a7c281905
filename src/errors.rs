use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the harness.
///
/// `ProtocolViolation`, `CommandRejected` and `StalledGeneration` make up the
/// protocol-level taxonomy; the remaining variants cover transport, caller
/// configuration and serialization failures. None of them is retried
/// automatically: every error aborts the generation loop and the outer run,
/// after best-effort entity cleanup.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer sent something that is not a valid response envelope:
    /// unparseable text, a non-object payload, a shape with both or neither
    /// of `result`/`error`, or a mismatched correlation id.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server answered with the error shape. The payload is carried
    /// verbatim so callers can report exactly what the server said.
    #[error("command `{command}` rejected by server: {error}")]
    CommandRejected { command: String, error: Value },

    /// The generation loop saw this many consecutive rounds with zero
    /// inferred tokens and gave up instead of looping forever.
    #[error("generation stalled: {0} consecutive rounds produced no tokens")]
    StalledGeneration(u32),

    #[error("request timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        HarnessError::ProtocolViolation(message.into())
    }
}
