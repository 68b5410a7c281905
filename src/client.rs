use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::connection::{MessageTransport, TcpLineTransport};
use crate::errors::HarnessError;
use crate::request::CommandRequest;
use crate::response::CommandResponse;
use crate::DEFAULT_TIMEOUT;

/// Source of correlation ids, injected so tests and callers can supply
/// deterministic ids instead of process-wide random state.
///
/// Ids must be unique for the lifetime of the connection; a collision is a
/// programming error in the source, not a runtime condition the client
/// recovers from.
pub trait IdSource: Send {
    fn next_id(&mut self) -> String;
}

/// Default id source: a plain counter, unique per client lifetime.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> String {
        self.next += 1;
        self.next.to_string()
    }
}

/// Correlation layer: one command in flight at a time.
///
/// `invoke` assigns a fresh correlation id, encodes the envelope, sends it
/// and suspends until the single outstanding response arrives. The protocol
/// matches responses positionally, so the id is carried for traceability and
/// checked only when the server round-trips it. Exclusive access for the
/// one-in-flight discipline is enforced by the `&mut self` receivers; a
/// multiplexed variant would need the server to guarantee the id round-trip
/// and this layer to keep a pending-request map of id to waiter, neither of
/// which the protocol promises today.
pub struct CommandClient {
    transport: Box<dyn MessageTransport>,
    ids: Box<dyn IdSource>,
    invoke_timeout: Duration,
}

impl CommandClient {
    pub fn new(transport: Box<dyn MessageTransport>) -> Self {
        Self {
            transport,
            ids: Box::new(SequentialIds::new()),
            invoke_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Dials the service over TCP and wraps the connection.
    pub async fn connect(endpoint: &str) -> Result<Self, HarnessError> {
        let transport = TcpLineTransport::connect(endpoint).await?;
        Ok(Self::new(Box::new(transport)))
    }

    pub fn with_id_source(mut self, ids: Box<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Issues one command and awaits its response.
    ///
    /// Returns the success payload, the server's rejection verbatim, or the
    /// transport/protocol failure. A timeout here is a round failure for the
    /// caller; the connection is not reusable afterwards because the late
    /// response would desynchronize the positional matching.
    pub async fn invoke(
        &mut self,
        command: &str,
        data: Option<Value>,
    ) -> Result<Value, HarnessError> {
        let correlation_id = self.ids.next_id();
        let request = CommandRequest::new(correlation_id.clone(), command, data);
        // Encoding failures are caller bugs; fail before anything is sent.
        let line = request.encode()?;

        debug!(command, correlation_id = %correlation_id, "sending command");
        self.transport.send_text(line).await?;

        let reply = match tokio::time::timeout(self.invoke_timeout, self.transport.receive_text())
            .await
        {
            Ok(received) => received?,
            Err(_) => return Err(HarnessError::Timeout),
        };

        let Some(reply) = reply else {
            return Err(HarnessError::Connection(
                "connection closed while awaiting response".to_string(),
            ));
        };

        let response = CommandResponse::decode(&reply)?;
        if let Some(echoed) = response.correlation_id() {
            if echoed != correlation_id {
                return Err(HarnessError::protocol(format!(
                    "correlation id mismatch: sent {correlation_id}, received {echoed}"
                )));
            }
        }

        debug!(command, correlation_id = %correlation_id, ok = response.result().is_some(), "received response");
        response.into_result(command)
    }

    /// Round-trip probe. The server echoes the payload back as the result.
    pub async fn echo(&mut self, payload: Value) -> Result<Value, HarnessError> {
        self.invoke("echo", Some(payload)).await
    }

    /// Closes the underlying connection.
    pub async fn shutdown(&mut self) -> Result<(), HarnessError> {
        self.transport.close().await
    }
}
