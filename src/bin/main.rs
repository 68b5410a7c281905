use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inferbench::{Harness, HarnessConfig};

/// Benchmark a token-generation service over its line-oriented JSON protocol.
#[derive(Parser)]
#[command(name = "inferbench")]
#[command(version, about, long_about = None)]
struct Args {
    /// Prompt used to prime generation
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,

    /// Service endpoint as host:port
    #[arg(long, default_value = "127.0.0.1:5678")]
    endpoint: String,

    /// Number of tokens to generate
    #[arg(long, default_value = "150")]
    tokens: u64,

    /// Per-command timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Consecutive empty rounds tolerated before aborting
    #[arg(long, default_value = "5")]
    stall_limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inferbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = HarnessConfig::new()
        .with_endpoint(args.endpoint)
        .with_prompt(args.prompt.join(" "))
        .with_target_tokens(args.tokens)
        .with_invoke_timeout(Duration::from_secs(args.timeout_secs))
        .with_stall_limit(args.stall_limit);

    let mut harness = Harness::connect(config).await?;

    match harness.run().await {
        Ok(report) => {
            println!("{}", report.output);
            info!(
                "Generated {} tokens in {:.2}s ({:.1} tok/s)",
                report.total_inferred_tokens,
                report.total_elapsed_ms / 1000.0,
                report.tokens_per_second.unwrap_or(0.0)
            );
            harness.shutdown().await?;
            Ok(())
        }
        Err(err) => {
            // Show whatever the failed run managed to produce.
            let partial = harness.report();
            if !partial.output.is_empty() {
                println!("{}", partial.output);
            }
            let _ = harness.shutdown().await;
            Err(err.into())
        }
    }
}
