// ABOUTME: Client module: configuration, builder, errors, facade, pipeline and interceptors
// ABOUTME: Exports the public surface; wire-level modules live at the crate root

//! The client surface.
//!
//! This module assembles the wire-level pieces (codec, endpoints, pool,
//! queue) into the public API:
//!
//! * [`Client`] — the façade: `submit`, `submit_nowait`, `pipeline`,
//!   `dispose`, plus the typed per-command wrappers (GET, SET, INCR, ...)
//! * [`ClientBuilder`] — connect with configuration and interceptors
//! * [`ClientConfig`] — pool sizing, batching, timeouts, reconnect,
//!   handshake credentials
//! * [`Pipeline`] — batch many commands into one network round-trip with
//!   individual reply futures
//! * [`Interceptor`] — middleware wrapping each command invocation
//! * [`RespError`] — the full error surface, distinct at the type level
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respipe::{Client, ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect("localhost", 6379, ClientConfig::default()).await?;
//!
//! client.set("key", "value").await?;
//! let value = client.get("key").await?;
//! assert!(value.is_some());
//!
//! client.dispose().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! A submission flows through the interceptor chain into a bounded queue;
//! one batcher task drains the queue and hands coalesced batches to an
//! endpoint chosen by the pool's load policy. Each endpoint runs exactly
//! two long-lived tasks (writer, reader) over one TCP connection; the
//! reader fulfils reply slots strictly in submission order.

pub mod builder;
pub mod commands;
pub mod config;
pub mod error;
pub mod handle;
pub mod interceptor;
pub mod pipeline;

// Re-export the main types for easy access
pub use builder::ClientBuilder;
pub use config::{BatchProfile, ClientConfig, FaultObserver, FullMode, LoadPolicy};
pub use error::{RespError, RespResult};
pub use handle::Client;
pub use interceptor::{
    CommandContext, Interceptor, LoggingInterceptor, Next, RetryInterceptor, TerminalHandler,
};
pub use pipeline::Pipeline;
