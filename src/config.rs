use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::generation::DEFAULT_STALL_LIMIT;
use crate::session::EntitySpec;
use crate::DEFAULT_TIMEOUT;

/// Settings for one harness run against a generation server.
///
/// Defaults mirror a plain benchmark run: one state, a typical sampler, a
/// global penalty transformer, and a 150 token target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    endpoint: String,
    prompt: String,
    target_tokens: u64,
    invoke_timeout: Duration,
    stall_limit: u32,
    sampler: EntitySpec,
    transformer: Option<EntitySpec>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5678".to_string(),
            prompt: String::new(),
            target_tokens: 150,
            invoke_timeout: DEFAULT_TIMEOUT,
            stall_limit: DEFAULT_STALL_LIMIT,
            sampler: EntitySpec::new("typical")
                .with_param("temp", 2.5)
                .with_param("top_p", 0.6),
            transformer: Some(
                EntitySpec::new("global_penalty")
                    .with_param("alpha_occurrence", 0.3)
                    .with_param("alpha_presence", 0.3),
            ),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_target_tokens(mut self, target_tokens: u64) -> Self {
        self.target_tokens = target_tokens;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn with_stall_limit(mut self, stall_limit: u32) -> Self {
        self.stall_limit = stall_limit;
        self
    }

    pub fn with_sampler(mut self, sampler: EntitySpec) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_transformer(mut self, transformer: Option<EntitySpec>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn target_tokens(&self) -> u64 {
        self.target_tokens
    }

    pub fn invoke_timeout(&self) -> Duration {
        self.invoke_timeout
    }

    pub fn stall_limit(&self) -> u32 {
        self.stall_limit
    }

    pub fn sampler(&self) -> &EntitySpec {
        &self.sampler
    }

    pub fn transformer(&self) -> Option<&EntitySpec> {
        self.transformer.as_ref()
    }
}
