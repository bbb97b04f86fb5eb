// ABOUTME: Minimal walkthrough: connect, SET, GET, INCR, clean shutdown
// ABOUTME: Run with `cargo run --example get_set -- --host localhost --port 6379`

use argh::FromArgs;
use respipe::{Client, ClientConfig};

#[derive(FromArgs)]
/// Issue a few commands against a RESP server.
struct Args {
    /// server hostname
    #[argh(option, default = "String::from(\"localhost\")")]
    host: String,

    /// server port
    #[argh(option, default = "6379")]
    port: u16,

    /// number of pooled connections
    #[argh(option, default = "2")]
    connections: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let config = ClientConfig::default().with_connection_count(args.connections);
    let client = Client::connect(&args.host, args.port, config).await?;

    client.set("demo:greeting", "hello from respipe").await?;
    match client.get("demo:greeting").await? {
        Some(value) => println!("demo:greeting = {}", String::from_utf8_lossy(&value)),
        None => println!("demo:greeting missing"),
    }

    let count = client.incr("demo:counter").await?;
    println!("demo:counter = {count}");

    client.del("demo:greeting").await?;
    client.dispose().await?;
    Ok(())
}
