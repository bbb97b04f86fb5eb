// ABOUTME: Composable middleware wrapping each logical command invocation
// ABOUTME: Nested composition, outermost-first; the terminal handler is the command-queue submitter

use crate::client::error::{RespError, RespResult};
use crate::codec;
use crate::command::Command;
use crate::frame::{Frame, FrameRef};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Middleware around a command invocation.
///
/// Interceptors compose by nesting: the first registered interceptor is
/// outermost. An implementation may short-circuit (return without calling
/// `next`), transform the reply after `next` returns, or intercept the
/// error branch and rethrow, suppress or translate it.
///
/// # Example
///
/// ```rust
/// use futures::future::BoxFuture;
/// use respipe::{CommandContext, Interceptor, Next};
/// use respipe::client::RespResult;
/// use respipe::Frame;
///
/// struct Stamp;
///
/// impl Interceptor for Stamp {
///     fn intercept<'a>(
///         &'a self,
///         ctx: &'a mut CommandContext,
///         next: Next<'a>,
///     ) -> BoxFuture<'a, RespResult<Frame>> {
///         Box::pin(async move {
///             ctx.set_property("stamped", true);
///             next.run(ctx).await
///         })
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync + 'static {
    fn intercept<'a>(
        &'a self,
        ctx: &'a mut CommandContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RespResult<Frame>>;
}

/// The rest of the chain below the current interceptor.
///
/// `Copy` on purpose: a retrying interceptor re-runs the tail by invoking a
/// fresh copy per attempt.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn TerminalHandler,
}

impl<'a> Next<'a> {
    /// Continue the invocation: the next interceptor if any, otherwise the
    /// terminal handler.
    pub fn run<'b>(self, ctx: &'b mut CommandContext) -> BoxFuture<'b, RespResult<Frame>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((head, rest)) => head.intercept(
                ctx,
                Next {
                    chain: rest,
                    terminal: self.terminal,
                },
            ),
            None => self.terminal.call(ctx),
        }
    }
}

/// The innermost handler of every chain. For a live client this is the
/// queue submitter; tests substitute their own.
pub trait TerminalHandler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut CommandContext) -> BoxFuture<'a, RespResult<Frame>>;
}

/// An ordered, immutable set of interceptors.
#[derive(Clone, Default)]
pub(crate) struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> InterceptorChain {
        InterceptorChain {
            interceptors: interceptors.into(),
        }
    }

    pub async fn execute(
        &self,
        ctx: &mut CommandContext,
        terminal: &dyn TerminalHandler,
    ) -> RespResult<Frame> {
        Next {
            chain: &self.interceptors,
            terminal,
        }
        .run(ctx)
        .await
    }
}

/// Per-invocation state visible to every interceptor: the command, a typed
/// property bag, and the cancellation signal.
pub struct CommandContext {
    name: &'static str,
    bytes: Bytes,
    properties: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    named: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    cancel: CancellationToken,
}

impl CommandContext {
    pub fn new(command: &Command, cancel: CancellationToken) -> CommandContext {
        CommandContext {
            name: command.name(),
            bytes: command.bytes().clone(),
            properties: HashMap::new(),
            named: HashMap::new(),
            cancel,
        }
    }

    /// The command keyword, e.g. `"GET"`.
    pub fn command_name(&self) -> &'static str {
        self.name
    }

    /// The encoded wire bytes of the command.
    pub fn wire_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Views of the command's arguments, decoded from the wire form on
    /// demand (index 0 is the command keyword itself).
    pub fn args(&self) -> Vec<Bytes> {
        match codec::try_read(&self.bytes) {
            Ok(Some((FrameRef::Array(items), _))) => items
                .iter()
                .filter_map(|item| match item {
                    FrameRef::Bulk(payload) => Some(Bytes::copy_from_slice(payload)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The cancellation/timeout signal for this invocation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Store a typed value in the property bag, keyed by type.
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.properties.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Fetch a typed value from the property bag.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.properties
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Store a value under an explicit name.
    pub fn set_property<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.named.insert(key, Box::new(value));
    }

    /// Fetch a named value.
    pub fn property<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.named.get(key).and_then(|boxed| boxed.downcast_ref())
    }
}

/// Logs every invocation with its outcome and latency.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn intercept<'a>(
        &'a self,
        ctx: &'a mut CommandContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RespResult<Frame>> {
        Box::pin(async move {
            let command = ctx.command_name();
            let started = Instant::now();
            let result = next.run(ctx).await;
            let elapsed = started.elapsed();
            match &result {
                Ok(_) => debug!(command, ?elapsed, "command completed"),
                Err(err) => warn!(command, ?elapsed, error = %err, "command failed"),
            }
            result
        })
    }
}

/// Retries transport-level failures a bounded number of times.
///
/// The core never retries implicitly; this is the opt-in policy. Only
/// errors that mean "the command may not have been processed at all" are
/// retried — server errors, timeouts and cancellations pass straight
/// through. Each retry re-enters the tail of the chain as a fresh
/// submission.
#[derive(Debug)]
pub struct RetryInterceptor {
    max_retries: u32,
}

impl RetryInterceptor {
    pub fn new(max_retries: u32) -> RetryInterceptor {
        RetryInterceptor { max_retries }
    }

    fn should_retry(err: &RespError) -> bool {
        matches!(
            err,
            RespError::Transport { .. } | RespError::NoHealthyEndpoint
        )
    }
}

impl Interceptor for RetryInterceptor {
    fn intercept<'a>(
        &'a self,
        ctx: &'a mut CommandContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RespResult<Frame>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                let result = next.run(&mut *ctx).await;
                match &result {
                    Err(err) if Self::should_retry(err) && attempt < self.max_retries => {
                        attempt += 1;
                        warn!(
                            command = ctx.command_name(),
                            attempt,
                            error = %err,
                            "retrying after transport failure"
                        );
                    }
                    _ => return result,
                }
            }
        })
    }
}
