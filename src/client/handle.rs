// ABOUTME: The Client facade: owns the queue, batcher, pool and interceptor chain
// ABOUTME: submit routes through the chain; the terminal handler is the queue submitter

use crate::client::builder::ClientBuilder;
use crate::client::config::ClientConfig;
use crate::client::error::{RespError, RespResult};
use crate::client::interceptor::{CommandContext, InterceptorChain, TerminalHandler};
use crate::client::pipeline::Pipeline;
use crate::command::Command;
use crate::frame::Frame;
use crate::pool::Pool;
use crate::queue::{self, CommandQueue, QueueEntry, Submission, pending_reply};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A handle to a pool of pipelined connections.
///
/// Cheap to clone; all clones share the same pool, queue and interceptor
/// chain. Request flow: caller → interceptor chain → command queue →
/// batcher → endpoint writer → socket; replies come back through the
/// endpoint reader and fulfil each caller's future in submission order.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    queue: CommandQueue,
    pool: Arc<Pool>,
    chain: InterceptorChain,
    terminal: QueueSubmitter,
    disposed: AtomicBool,
    batcher: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect with the given configuration and no interceptors.
    ///
    /// Use [`ClientBuilder`] to register interceptors.
    pub async fn connect(host: &str, port: u16, config: ClientConfig) -> RespResult<Client> {
        ClientBuilder::new(host, port).with_config(config).connect().await
    }

    pub(crate) async fn assemble(
        host: &str,
        port: u16,
        config: ClientConfig,
        chain: InterceptorChain,
    ) -> RespResult<Client> {
        let pool = Pool::connect(host, port, &config).await?;
        let command_queue = CommandQueue::new(config.queue_capacity, config.full_mode);
        let batcher = tokio::spawn(queue::run_batcher(
            command_queue.clone(),
            pool.clone(),
            config.clone(),
        ));
        let terminal = QueueSubmitter {
            queue: command_queue.clone(),
            command_timeout: config.command_timeout,
        };
        debug!(host, port, connections = config.connection_count, "client ready");
        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                queue: command_queue,
                pool,
                chain,
                terminal,
                disposed: AtomicBool::new(false),
                batcher: Mutex::new(Some(batcher)),
            }),
        })
    }

    /// Submit one command and await its reply.
    pub async fn submit(&self, command: Command) -> RespResult<Frame> {
        self.submit_with_cancel(command, CancellationToken::new())
            .await
    }

    /// Submit one command with an external cancellation signal.
    ///
    /// Cancelling before the command is written removes it from the queue;
    /// cancelling afterwards resolves the caller with `Cancelled` while the
    /// reply slot stays behind to absorb (and discard) the server's reply.
    pub async fn submit_with_cancel(
        &self,
        command: Command,
        cancel: CancellationToken,
    ) -> RespResult<Frame> {
        if self.is_disposed() {
            return Err(RespError::Disposed);
        }
        let mut ctx = CommandContext::new(&command, cancel);
        self.inner.chain.execute(&mut ctx, &self.inner.terminal).await
    }

    /// Submit a command without exposing its reply.
    ///
    /// Every RESP command still generates a reply; fire-and-forget only
    /// means the future is discarded here. The reply slot is created as
    /// usual and the endpoint reader consumes and drops the reply.
    pub async fn submit_nowait(&self, command: Command) -> RespResult<()> {
        if self.is_disposed() {
            return Err(RespError::Disposed);
        }
        let (reply, future) = pending_reply(command.name());
        drop(future);
        let submission = Submission::One(QueueEntry {
            command: command.bytes().clone(),
            reply,
            cancel: CancellationToken::new(),
        });
        // A saturated `Wait`-mode queue suspends the push; the command
        // timeout bounds that suspension here just as it does for awaited
        // submissions.
        match timeout(self.inner.config.command_timeout, self.inner.queue.push(submission)).await
        {
            Ok(()) => Ok(()),
            Err(_) => Err(RespError::Timeout),
        }
    }

    /// Start building a pipeline: commands accumulate locally and land on
    /// one endpoint as a single contiguous batch.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// Endpoint states, for observability.
    pub fn endpoint_states(&self) -> Vec<crate::connection::EndpointState> {
        self.inner.pool.states()
    }

    /// Shut down: refuse new submissions, flush what is queued, drain every
    /// endpoint, and wait for all tasks. Idempotent.
    pub async fn dispose(&self) -> RespResult<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("disposing client");
        self.inner.queue.close();
        let batcher = self
            .inner
            .batcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = batcher {
            let _ = handle.await;
        }
        self.inner.pool.shutdown().await;
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn queue(&self) -> &CommandQueue {
        &self.inner.queue
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        self.inner.config.command_timeout
    }
}

/// The terminal handler: enqueue, then await the reply, both under the
/// command timeout and the caller's cancellation signal.
pub(crate) struct QueueSubmitter {
    queue: CommandQueue,
    command_timeout: Duration,
}

impl TerminalHandler for QueueSubmitter {
    fn call<'a>(&'a self, ctx: &'a mut CommandContext) -> BoxFuture<'a, RespResult<Frame>> {
        Box::pin(async move {
            let (reply, future) = pending_reply(ctx.command_name());
            let cancel = ctx.cancellation().clone();
            let submission = Submission::One(QueueEntry {
                command: ctx.wire_bytes().clone(),
                reply,
                cancel: cancel.clone(),
            });

            // The deadline covers the enqueue as well as the reply: a
            // saturated `Wait`-mode queue suspends the push, and neither
            // that suspension nor the wait below may outlive the command
            // timeout or ignore the cancellation signal. Abandoning the
            // push leaves nothing behind — the command was never queued.
            let deadline = Instant::now() + self.command_timeout;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RespError::Cancelled),
                pushed = timeout_at(deadline, self.queue.push(submission)) => {
                    if pushed.is_err() {
                        return Err(RespError::Timeout);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RespError::Cancelled),
                result = timeout_at(deadline, future.wait()) => match result {
                    Ok(reply) => reply,
                    Err(_) => Err(RespError::Timeout),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::FullMode;
    use tokio::time::timeout as tokio_timeout;

    /// A capacity-1 `Wait`-mode queue with its only slot occupied and no
    /// batcher draining it.
    async fn saturated_queue() -> CommandQueue {
        let queue = CommandQueue::new(1, FullMode::Wait);
        let (reply, _discarded) = pending_reply("PING");
        queue
            .push(Submission::One(QueueEntry {
                command: Command::ping().bytes().clone(),
                reply,
                cancel: CancellationToken::new(),
            }))
            .await;
        queue
    }

    #[tokio::test]
    async fn saturated_queue_still_honours_cancellation() {
        let queue = saturated_queue().await;
        let submitter = QueueSubmitter {
            queue: queue.clone(),
            command_timeout: Duration::from_secs(30),
        };

        let cancel = CancellationToken::new();
        let command = Command::ping();
        let mut ctx = CommandContext::new(&command, cancel.clone());

        // The push is suspended on the full queue; the caller must not be.
        let call = submitter.call(&mut ctx);
        tokio::pin!(call);
        assert!(
            tokio_timeout(Duration::from_millis(50), call.as_mut())
                .await
                .is_err(),
            "call should be parked on the full queue"
        );

        cancel.cancel();
        let result = tokio_timeout(Duration::from_millis(200), call)
            .await
            .expect("cancellation must wake the suspended push");
        assert_eq!(result, Err(RespError::Cancelled));

        // The cancelled command was never enqueued.
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn saturated_queue_still_honours_command_timeout() {
        let queue = saturated_queue().await;
        let submitter = QueueSubmitter {
            queue: queue.clone(),
            command_timeout: Duration::from_millis(100),
        };

        let command = Command::ping();
        let mut ctx = CommandContext::new(&command, CancellationToken::new());

        let started = Instant::now();
        let result = submitter.call(&mut ctx).await;
        assert_eq!(result, Err(RespError::Timeout));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "timeout must bound the suspended push"
        );
        assert_eq!(queue.depth(), 1);
    }
}
