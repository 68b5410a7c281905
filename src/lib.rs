//! Benchmark harness for a remote token-generation service.
//!
//! Speaks the service's line-oriented JSON command protocol over a single
//! TCP connection, manages the server-side entities a run needs (state,
//! sampler, transformers), drives the autoregressive generation loop and
//! reports throughput from server-measured round durations.

use std::time::Duration;

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod generation;
pub mod harness;
pub mod metrics;
pub mod request;
pub mod response;
pub mod session;

#[cfg(not(test))]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

pub use client::{CommandClient, IdSource, SequentialIds};
pub use config::HarnessConfig;
pub use connection::{MessageTransport, TcpLineTransport, MAX_LINE_BYTES};
pub use errors::HarnessError;
pub use generation::{
    GenerationLoop, GenerationPlan, InferOutput, InferRequest, Phase, DEFAULT_STALL_LIMIT,
};
pub use harness::{Harness, RunReport};
pub use metrics::RunAccumulator;
pub use request::CommandRequest;
pub use response::{CommandResponse, ResponseBody};
pub use session::{EntityKind, EntitySpec, LiveEntity, SessionManager};
