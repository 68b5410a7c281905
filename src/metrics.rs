/// Running totals across the rounds of one generation run.
///
/// Owned by the harness rather than the loop so that whatever a failed run
/// produced up to the failing round is still readable afterwards. Totals are
/// monotone: recording only ever adds.
#[derive(Debug, Clone, Default)]
pub struct RunAccumulator {
    rounds: u32,
    total_elapsed_ms: f64,
    total_inferred_tokens: u64,
    output: String,
}

impl RunAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one round's result in: appends the decoded text and adds the
    /// token count and server-measured duration to the totals.
    pub fn record_round(&mut self, value: &str, inferred_tokens: u64, duration_ms: f64) {
        self.rounds += 1;
        self.output.push_str(value);
        self.total_inferred_tokens += inferred_tokens;
        self.total_elapsed_ms += duration_ms;
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn total_elapsed_ms(&self) -> f64 {
        self.total_elapsed_ms
    }

    pub fn total_inferred_tokens(&self) -> u64 {
        self.total_inferred_tokens
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Aggregate throughput over server-reported durations, or `None` before
    /// any time has been accounted (avoids a 0/0 rate).
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.total_elapsed_ms > 0.0 {
            Some(self.total_inferred_tokens as f64 / (self.total_elapsed_ms / 1000.0))
        } else {
            None
        }
    }
}
