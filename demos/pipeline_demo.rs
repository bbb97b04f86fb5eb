// ABOUTME: Pipelined batch walkthrough: many commands, one round-trip, demuxed replies
// ABOUTME: Run with `cargo run --example pipeline_demo -- --batch 100`

use argh::FromArgs;
use respipe::{Client, ClientConfig, Command};
use std::time::Instant;

#[derive(FromArgs)]
/// Submit a pipelined batch and time the round-trip.
struct Args {
    /// server hostname
    #[argh(option, default = "String::from(\"localhost\")")]
    host: String,

    /// server port
    #[argh(option, default = "6379")]
    port: u16,

    /// commands per pipeline
    #[argh(option, default = "100")]
    batch: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let client = Client::connect(&args.host, args.port, ClientConfig::default()).await?;

    let mut pipe = client.pipeline();
    for i in 0..args.batch {
        pipe.then(Command::set(format!("pipe:{i}"), i.to_string()));
    }
    pipe.then(Command::incr("pipe:executions"));

    let started = Instant::now();
    let replies = pipe.execute().await?;
    let elapsed = started.elapsed();

    let failures = replies.iter().filter(|reply| reply.is_err()).count();
    println!(
        "{} commands in one round-trip: {:?} total, {} failed",
        args.batch + 1,
        elapsed,
        failures
    );
    if let Some(Ok(frame)) = replies.last() {
        println!("pipeline executions so far: {frame}");
    }

    client.dispose().await?;
    Ok(())
}
