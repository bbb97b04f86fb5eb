// ABOUTME: Client factory and builder for connecting with configuration and interceptors
// ABOUTME: Interceptor registration order is execution order: first registered runs outermost

use crate::client::config::ClientConfig;
use crate::client::error::RespResult;
use crate::client::handle::Client;
use crate::client::interceptor::{Interceptor, InterceptorChain};
use std::sync::Arc;

/// Builder for a [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// use respipe::client::{ClientBuilder, LoggingInterceptor, RetryInterceptor};
/// use respipe::ClientConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new("localhost", 6379)
///     .with_config(ClientConfig::default().with_resp3(true))
///     .with_interceptor(LoggingInterceptor)
///     .with_interceptor(RetryInterceptor::new(2))
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    host: String,
    port: u16,
    config: ClientConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> ClientBuilder {
        ClientBuilder {
            host: host.into(),
            port,
            config: ClientConfig::default(),
            interceptors: Vec::new(),
        }
    }

    /// Replace the configuration wholesale.
    pub fn with_config(mut self, config: ClientConfig) -> ClientBuilder {
        self.config = config;
        self
    }

    /// Append an interceptor. The first registered is outermost.
    pub fn with_interceptor(mut self, interceptor: impl Interceptor) -> ClientBuilder {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Connect the pool, run handshakes, and hand back a ready client.
    pub async fn connect(self) -> RespResult<Client> {
        Client::assemble(
            &self.host,
            self.port,
            self.config,
            InterceptorChain::new(self.interceptors),
        )
        .await
    }

    /// Quick connection with defaults, for the simple cases.
    pub async fn quick(host: impl Into<String>, port: u16) -> RespResult<Client> {
        ClientBuilder::new(host, port).connect().await
    }
}
