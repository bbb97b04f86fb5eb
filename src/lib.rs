pub mod buffer;
pub mod client;
pub mod codec;
pub mod command;
pub mod connection;
pub mod frame;
pub mod pool;
pub mod queue;

#[cfg(test)]
mod tests;

// Re-export codec entry points for direct access
pub use codec::{CodecError, command_len, encode_command, encode_frame, try_read};

// Re-export the frame value types
pub use frame::{Frame, FrameRef};

// Re-export command construction
pub use command::Command;

// Re-export the main client API for easy access
pub use client::{
    BatchProfile, Client, ClientBuilder, ClientConfig, CommandContext, FullMode, Interceptor,
    LoadPolicy, Next, Pipeline, RespError, RespResult,
};

/// Error returned by most fallible setup functions.
///
/// When writing a real application, one might want to consider a specialized
/// error handling crate or defining an error type as an `enum` of causes.
/// The client surface does exactly that ([`client::RespError`]); this boxed
/// alias exists for the seams where any error source must flow through a
/// single channel (demo binaries, task join plumbing).
///
/// For performance reasons, boxing is avoided in any hot path. For example,
/// the decoder reports a partial frame as `Ok(None)` rather than an error
/// value, because partial frames are hit and handled during normal execution
/// whenever the socket delivers a fragment of a reply.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for fallible setup operations.
///
/// This is defined as a convenience.
///
/// # Examples
///
/// ## Basic request/reply
///
/// This example shows the simplest way to issue commands against a
/// RESP-speaking server:
///
/// ```rust,no_run
/// use respipe::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Connect a small pool of pipelined connections
///     let client = Client::connect("localhost", 6379, ClientConfig::default()).await?;
///
///     client.set("greeting", "hello").await?;
///     let value = client.get("greeting").await?;
///
///     println!("greeting = {value:?}");
///
///     client.dispose().await?;
///     Ok(())
/// }
/// ```
///
/// ## Pipelined batch
///
/// This example batches several commands into one network round-trip and
/// demuxes the individual replies:
///
/// ```rust,no_run
/// use respipe::{Client, ClientConfig, Command};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect("localhost", 6379, ClientConfig::default()).await?;
///
///     let mut pipe = client.pipeline();
///     pipe.then(Command::set("a", "1"))
///         .then(Command::set("b", "2"))
///         .then(Command::incr("a"));
///
///     for reply in pipe.execute().await? {
///         println!("{:?}", reply?);
///     }
///
///     client.dispose().await?;
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
