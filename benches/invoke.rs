use criterion::{criterion_group, criterion_main, Criterion};
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_util::codec::{Framed, LinesCodec};

use inferbench::CommandClient;

// ==========================
//   Benchmark Setup
// ==========================
// Loopback service that answers every command immediately: echo returns its
// payload, infer returns a fixed round. Measures harness and wire overhead,
// not model time.
async fn start_bench_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(socket, LinesCodec::new());
                while let Some(Ok(line)) = framed.next().await {
                    let request: Value = serde_json::from_str(&line).unwrap();
                    let reply = match request["command"].as_str() {
                        Some("infer") => json!({
                            "correlation_id": request["correlation_id"],
                            "result": {
                                "value": "lorem ipsum dolor sit amet ",
                                "last_token": 7,
                                "inferred_tokens": 32,
                                "duration_ms": 0.25,
                            },
                        }),
                        _ => json!({
                            "correlation_id": request["correlation_id"],
                            "result": request["data"],
                        }),
                    };
                    if framed.send(reply.to_string()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

// ==========================
//  The Benchmark Functions
// ==========================
fn bench_echo(c: &mut Criterion) {
    // One runtime, one server, one reused connection; each iteration is a
    // single command round trip.
    let rt = Runtime::new().unwrap();

    let addr = rt.block_on(start_bench_server());
    let mut client = rt.block_on(async {
        CommandClient::connect(&addr.to_string())
            .await
            .expect("client connect")
    });

    c.bench_function("echo round trip", |b| {
        b.iter_custom(|iterations| {
            let start = std::time::Instant::now();

            rt.block_on(async {
                for _ in 0..iterations {
                    let _ = client.echo(json!("hello")).await.unwrap();
                }
            });

            start.elapsed()
        });
    });
}

fn bench_infer_round(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let addr = rt.block_on(start_bench_server());
    let mut client = rt.block_on(async {
        CommandClient::connect(&addr.to_string())
            .await
            .expect("client connect")
    });

    // The request shape a feedback round sends.
    let data = json!({
        "tokens": [[7]],
        "states": ["state-1"],
        "transformers": [["transformer-1"]],
        "sampler": "sampler-1",
        "update_prompt": true,
        "reset_on_exhaustion": true,
    });

    c.bench_function("infer round", |b| {
        b.iter_custom(|iterations| {
            let start = std::time::Instant::now();

            rt.block_on(async {
                for _ in 0..iterations {
                    let _ = client.invoke("infer", Some(data.clone())).await.unwrap();
                }
            });

            start.elapsed()
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = bench_echo, bench_infer_round
}

criterion_main!(benches);
