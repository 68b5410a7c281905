use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::CommandClient;
use crate::errors::HarnessError;
use crate::metrics::RunAccumulator;

/// Consecutive zero-token rounds tolerated before the loop gives up.
pub const DEFAULT_STALL_LIMIT: u32 = 5;

/// Wire shape of the `infer` command's data field.
#[derive(Debug, Clone, Serialize)]
pub struct InferRequest {
    pub tokens: Option<Vec<Value>>,
    pub states: Vec<String>,
    pub transformers: Vec<Vec<String>>,
    pub sampler: String,
    pub update_prompt: bool,
    pub reset_on_exhaustion: bool,
}

/// One round's result as reported by the server. `last_token` is opaque and
/// is fed back verbatim as the next round's input.
#[derive(Debug, Clone, Deserialize)]
pub struct InferOutput {
    pub value: String,
    pub last_token: Value,
    pub inferred_tokens: u64,
    pub duration_ms: f64,
}

/// Fixed configuration of a generation run.
///
/// `states`, `transformers` (one id list per state) and `seed_tokens` (one
/// seed entry per state) must line up; `update_prompt` keeps the server
/// persisting generated tokens into the state context, `reset_on_exhaustion`
/// asks it to reset context instead of failing when capacity runs out.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub states: Vec<String>,
    pub transformers: Vec<Vec<String>>,
    pub sampler: String,
    pub seed_tokens: Vec<Value>,
    pub target_tokens: u64,
    pub stall_limit: u32,
    pub update_prompt: bool,
    pub reset_on_exhaustion: bool,
}

impl GenerationPlan {
    pub fn new(
        states: Vec<String>,
        transformers: Vec<Vec<String>>,
        sampler: impl Into<String>,
        seed_tokens: Vec<Value>,
        target_tokens: u64,
    ) -> Self {
        Self {
            states,
            transformers,
            sampler: sampler.into(),
            seed_tokens,
            target_tokens,
            stall_limit: DEFAULT_STALL_LIMIT,
            update_prompt: true,
            reset_on_exhaustion: true,
        }
    }

    pub fn with_stall_limit(mut self, stall_limit: u32) -> Self {
        self.stall_limit = stall_limit;
        self
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.states.is_empty() {
            return Err(HarnessError::Config(
                "generation plan names no states".to_string(),
            ));
        }
        if self.transformers.len() != self.states.len() {
            return Err(HarnessError::Config(format!(
                "{} transformer lists for {} states",
                self.transformers.len(),
                self.states.len()
            )));
        }
        if self.seed_tokens.len() != self.states.len() {
            return Err(HarnessError::Config(format!(
                "{} seed entries for {} states",
                self.seed_tokens.len(),
                self.states.len()
            )));
        }
        if self.stall_limit == 0 {
            return Err(HarnessError::Config(
                "stall limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loop phase. `Feeding` carries the previous round's token so a fed round
/// without a token to feed is unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Priming,
    Feeding { last_token: Value },
    Done,
}

/// Drives repeated `infer` rounds until the target token count is reached.
///
/// The first round is seeded with the externally supplied prompt tokens;
/// every later round feeds back the previous round's `last_token`, wrapped
/// one-per-state as a single-element sequence. Round results accumulate into
/// a caller-owned [`RunAccumulator`], so whatever was produced before a
/// failing round stays available.
pub struct GenerationLoop {
    plan: GenerationPlan,
    phase: Phase,
    stalled_rounds: u32,
}

impl GenerationLoop {
    pub fn new(plan: GenerationPlan) -> Self {
        Self {
            plan,
            phase: Phase::Priming,
            stalled_rounds: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn plan(&self) -> &GenerationPlan {
        &self.plan
    }

    /// Runs rounds until the plan's target is reached or a round fails.
    ///
    /// Zero-token rounds do not terminate the loop early, but
    /// `plan.stall_limit` consecutive ones abort it with
    /// [`HarnessError::StalledGeneration`] instead of looping forever. Any
    /// round error is propagated as-is after its round has been recorded.
    pub async fn run(
        &mut self,
        client: &mut CommandClient,
        accumulator: &mut RunAccumulator,
    ) -> Result<(), HarnessError> {
        self.plan.validate()?;

        if accumulator.total_inferred_tokens() >= self.plan.target_tokens {
            self.phase = Phase::Done;
        }

        loop {
            let tokens = match &self.phase {
                Phase::Done => break,
                Phase::Priming => self.plan.seed_tokens.clone(),
                Phase::Feeding { last_token } => {
                    feedback_tokens(last_token, self.plan.states.len())
                }
            };

            let output = self.round(client, tokens).await?;

            accumulator.record_round(&output.value, output.inferred_tokens, output.duration_ms);
            debug!(
                round = accumulator.rounds(),
                inferred = output.inferred_tokens,
                duration_ms = output.duration_ms,
                total = accumulator.total_inferred_tokens(),
                "round complete"
            );

            if output.inferred_tokens == 0 {
                self.stalled_rounds += 1;
                if self.stalled_rounds >= self.plan.stall_limit {
                    return Err(HarnessError::StalledGeneration(self.stalled_rounds));
                }
            } else {
                self.stalled_rounds = 0;
            }

            self.phase = if accumulator.total_inferred_tokens() >= self.plan.target_tokens {
                Phase::Done
            } else {
                Phase::Feeding {
                    last_token: output.last_token,
                }
            };
        }

        Ok(())
    }

    async fn round(
        &self,
        client: &mut CommandClient,
        tokens: Vec<Value>,
    ) -> Result<InferOutput, HarnessError> {
        let request = InferRequest {
            tokens: Some(tokens),
            states: self.plan.states.clone(),
            transformers: self.plan.transformers.clone(),
            sampler: self.plan.sampler.clone(),
            update_prompt: self.plan.update_prompt,
            reset_on_exhaustion: self.plan.reset_on_exhaustion,
        };

        let result = client
            .invoke("infer", Some(serde_json::to_value(&request)?))
            .await?;

        serde_json::from_value(result)
            .map_err(|e| HarnessError::protocol(format!("malformed infer result: {e}")))
    }
}

/// One fed-back token per state, each wrapped as a single-element sequence.
/// This is the input shape the server expects for feedback rounds.
fn feedback_tokens(last_token: &Value, states: usize) -> Vec<Value> {
    vec![Value::Array(vec![last_token.clone()]); states]
}
