use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::client::CommandClient;
use crate::config::HarnessConfig;
use crate::errors::HarnessError;
use crate::generation::{GenerationLoop, GenerationPlan};
use crate::metrics::RunAccumulator;
use crate::session::SessionManager;

/// Final numbers of a run, derived from the accumulator.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub rounds: u32,
    pub total_inferred_tokens: u64,
    pub total_elapsed_ms: f64,
    pub tokens_per_second: Option<f64>,
    pub output: String,
}

/// Orchestrates one benchmark run end to end: echo handshake, entity
/// creation, the generation loop, and cleanup.
///
/// Cleanup runs on every exit path, success or failure, and a failure keeps
/// the rounds accumulated so far readable through [`Harness::report`]. A
/// generation error takes precedence over a cleanup error in the returned
/// result; the cleanup failure is still logged by the session.
pub struct Harness {
    session: SessionManager,
    config: HarnessConfig,
    accumulator: RunAccumulator,
    runs: u64,
}

impl Harness {
    /// Wraps an already connected client, the seam the tests use.
    pub fn new(client: CommandClient, config: HarnessConfig) -> Self {
        let client = client.with_invoke_timeout(config.invoke_timeout());
        Self {
            session: SessionManager::new(client),
            config,
            accumulator: RunAccumulator::new(),
            runs: 0,
        }
    }

    /// Dials the configured endpoint and wraps the connection.
    pub async fn connect(config: HarnessConfig) -> Result<Self, HarnessError> {
        let client = CommandClient::connect(config.endpoint()).await?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Whatever the current (possibly failed) run has produced so far.
    pub fn report(&self) -> RunReport {
        RunReport {
            rounds: self.accumulator.rounds(),
            total_inferred_tokens: self.accumulator.total_inferred_tokens(),
            total_elapsed_ms: self.accumulator.total_elapsed_ms(),
            tokens_per_second: self.accumulator.tokens_per_second(),
            output: self.accumulator.output().to_string(),
        }
    }

    /// Runs the full benchmark once and reports the totals.
    ///
    /// Entities created by this run are released before returning, whether
    /// generation succeeded or not. Failed deletions leave their entities in
    /// the session registry and fail the run after a successful generation;
    /// after a failed generation the generation error is the one returned.
    pub async fn run(&mut self) -> Result<RunReport, HarnessError> {
        self.runs += 1;
        self.accumulator = RunAccumulator::new();

        let outcome = self.drive().await;
        let cleanup = self.session.cleanup().await;

        outcome?;
        cleanup?;

        let report = self.report();
        info!(
            rounds = report.rounds,
            tokens = report.total_inferred_tokens,
            elapsed_ms = report.total_elapsed_ms,
            "run complete"
        );
        Ok(report)
    }

    /// Closes the underlying connection.
    pub async fn shutdown(&mut self) -> Result<(), HarnessError> {
        self.session.client_mut().shutdown().await
    }

    async fn drive(&mut self) -> Result<(), HarnessError> {
        let probe = json!("ping");
        let echoed = self.session.client_mut().echo(probe.clone()).await?;
        if echoed != probe {
            return Err(HarnessError::protocol(format!(
                "echo returned {echoed} for probe {probe}"
            )));
        }

        let serial = self.runs;
        let sampler_spec = self.config.sampler().clone();
        let transformer_spec = self.config.transformer().cloned();

        let state_id = format!("state-{serial}");
        self.session.create_state(&state_id).await?;

        let sampler_id = format!("sampler-{serial}");
        self.session.create_sampler(&sampler_id, &sampler_spec).await?;

        // A state with no transformers still needs its (empty) id list.
        let transformers = match transformer_spec {
            Some(spec) => {
                let transformer_id = format!("transformer-{serial}");
                self.session.create_transformer(&transformer_id, &spec).await?;
                vec![vec![transformer_id]]
            }
            None => vec![vec![]],
        };

        let plan = GenerationPlan::new(
            vec![state_id],
            transformers,
            sampler_id,
            vec![Value::String(self.config.prompt().to_string())],
            self.config.target_tokens(),
        )
        .with_stall_limit(self.config.stall_limit());

        let mut generation = GenerationLoop::new(plan);
        generation
            .run(self.session.client_mut(), &mut self.accumulator)
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::Harness;
    use crate::client::CommandClient;
    use crate::config::HarnessConfig;
    use crate::connection::testing::ScriptedTransport;
    use crate::errors::HarnessError;

    fn round_reply(value: &str, last_token: i64, inferred: u64, duration_ms: f64) -> Value {
        json!({
            "value": value,
            "last_token": last_token,
            "inferred_tokens": inferred,
            "duration_ms": duration_ms,
        })
    }

    fn sent_commands(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .map(|line| {
                let sent: Value = serde_json::from_str(line).unwrap();
                sent["command"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn full_run_creates_generates_and_releases() {
        let transport = ScriptedTransport::new()
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("The quick ", 11, 50, 500.0))
            .push_result(round_reply("brown fox ", 12, 50, 500.0))
            .push_result(round_reply("jumps", 13, 50, 500.0))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null));
        let handle = transport.handle();

        let config = HarnessConfig::new().with_prompt("Tell me a story");
        let mut harness = Harness::new(CommandClient::new(Box::new(transport)), config);
        let report = harness.run().await.unwrap();

        assert_eq!(report.rounds, 3);
        assert_eq!(report.total_inferred_tokens, 150);
        assert_eq!(report.total_elapsed_ms, 1500.0);
        assert_eq!(report.tokens_per_second, Some(100.0));
        assert_eq!(report.output, "The quick brown fox jumps");

        let state = handle.lock().await;
        assert_eq!(
            sent_commands(&state.sent),
            vec![
                "echo",
                "create_state",
                "create_sampler",
                "create_transformer",
                "infer",
                "infer",
                "infer",
                "delete_transformer",
                "delete_sampler",
                "delete_state",
            ]
        );

        let create_state: Value = serde_json::from_str(&state.sent[1]).unwrap();
        assert_eq!(create_state["data"], json!("state-1"));
        let first_infer: Value = serde_json::from_str(&state.sent[4]).unwrap();
        assert_eq!(first_infer["data"]["tokens"], json!(["Tell me a story"]));
        assert_eq!(first_infer["data"]["states"], json!(["state-1"]));
        assert_eq!(first_infer["data"]["transformers"], json!([["transformer-1"]]));
        assert_eq!(first_infer["data"]["sampler"], json!("sampler-1"));
    }

    #[tokio::test]
    async fn echo_mismatch_aborts_before_any_entity_exists() {
        let transport = ScriptedTransport::new().push_result(json!("pong"));
        let handle = transport.handle();

        let mut harness = Harness::new(
            CommandClient::new(Box::new(transport)),
            HarnessConfig::new(),
        );
        let err = harness.run().await.unwrap_err();

        assert!(matches!(err, HarnessError::ProtocolViolation(_)));
        let state = handle.lock().await;
        assert_eq!(sent_commands(&state.sent), vec!["echo"]);
    }

    #[tokio::test]
    async fn generation_failure_still_releases_entities() {
        let transport = ScriptedTransport::new()
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("partial ", 7, 40, 250.0))
            .push_error(json!("sampler exploded"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null));
        let handle = transport.handle();

        let config = HarnessConfig::new().with_prompt("x");
        let mut harness = Harness::new(CommandClient::new(Box::new(transport)), config);
        let err = harness.run().await.unwrap_err();

        match err {
            HarnessError::CommandRejected { command, .. } => assert_eq!(command, "infer"),
            other => panic!("expected CommandRejected, got {other:?}"),
        }

        // Partial output survives the failure.
        let report = harness.report();
        assert_eq!(report.rounds, 1);
        assert_eq!(report.output, "partial ");
        assert_eq!(report.total_inferred_tokens, 40);

        let state = handle.lock().await;
        assert_eq!(
            sent_commands(&state.sent)[6..],
            ["delete_transformer", "delete_sampler", "delete_state"]
        );
    }

    #[tokio::test]
    async fn cleanup_failure_fails_an_otherwise_successful_run() {
        let transport = ScriptedTransport::new()
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("done", 5, 10, 100.0))
            .push_error(json!("transformer busy"))
            .push_result(json!(null))
            .push_result(json!(null));

        let config = HarnessConfig::new().with_target_tokens(10);
        let mut harness = Harness::new(CommandClient::new(Box::new(transport)), config);
        let err = harness.run().await.unwrap_err();

        match err {
            HarnessError::CommandRejected { command, .. } => {
                assert_eq!(command, "delete_transformer")
            }
            other => panic!("expected CommandRejected, got {other:?}"),
        }
        assert_eq!(harness.report().output, "done");
    }

    #[tokio::test]
    async fn run_without_transformer_sends_empty_id_lists() {
        let transport = ScriptedTransport::new()
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("ok", 1, 10, 100.0))
            .push_result(json!(null))
            .push_result(json!(null));
        let handle = transport.handle();

        let config = HarnessConfig::new()
            .with_target_tokens(10)
            .with_transformer(None);
        let mut harness = Harness::new(CommandClient::new(Box::new(transport)), config);
        harness.run().await.unwrap();

        let state = handle.lock().await;
        assert_eq!(
            sent_commands(&state.sent),
            vec![
                "echo",
                "create_state",
                "create_sampler",
                "infer",
                "delete_sampler",
                "delete_state",
            ]
        );
        let infer: Value = serde_json::from_str(&state.sent[3]).unwrap();
        assert_eq!(infer["data"]["transformers"], json!([[]]));
    }

    #[tokio::test]
    async fn second_run_mints_fresh_entity_ids() {
        let transport = ScriptedTransport::new()
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("a", 1, 10, 100.0))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!("ping"))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(round_reply("b", 2, 10, 100.0))
            .push_result(json!(null))
            .push_result(json!(null))
            .push_result(json!(null));
        let handle = transport.handle();

        let config = HarnessConfig::new().with_target_tokens(10);
        let mut harness = Harness::new(CommandClient::new(Box::new(transport)), config);
        harness.run().await.unwrap();
        let second = harness.run().await.unwrap();

        // The second run's accumulator starts from zero.
        assert_eq!(second.rounds, 1);
        assert_eq!(second.output, "b");

        let state = handle.lock().await;
        let create: Value = serde_json::from_str(&state.sent[9]).unwrap();
        assert_eq!(create["data"], json!("state-2"));
    }
}
