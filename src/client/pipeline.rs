// ABOUTME: Pipeline builder: accumulate commands locally, enqueue them as one atomic batch
// ABOUTME: All commands of a pipeline land contiguously on a single endpoint, replies demuxed per command

use crate::client::error::{RespError, RespResult};
use crate::client::handle::Client;
use crate::command::Command;
use crate::frame::Frame;
use crate::queue::{QueueEntry, ReplyFuture, Submission, pending_reply};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

/// A batch of commands submitted in one network round-trip.
///
/// The whole pipeline is enqueued atomically, so its commands appear
/// contiguously in the server's receive stream and their replies come back
/// in the same order. Executing an empty pipeline is a no-op; after
/// execution the pipeline is empty and can be reused.
///
/// # Example
///
/// ```rust,no_run
/// # use respipe::{Client, ClientConfig, Command};
/// # async fn example(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
/// let mut pipe = client.pipeline();
/// pipe.then(Command::set("a", "1"))
///     .then(Command::set("b", "2"))
///     .then(Command::incr("a"));
///
/// let replies = pipe.execute().await?;
/// assert_eq!(replies.len(), 3);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    client: Client,
    entries: Vec<(Command, bool)>,
}

impl Pipeline {
    pub(crate) fn new(client: Client) -> Pipeline {
        Pipeline {
            client,
            entries: Vec::new(),
        }
    }

    /// Append a command whose reply will be surfaced by `execute`.
    pub fn then(&mut self, command: Command) -> &mut Pipeline {
        self.entries.push((command, true));
        self
    }

    /// Append a fire-and-forget command. The server still replies; the
    /// reply slot is consumed and discarded without surfacing a future.
    pub fn then_forget(&mut self, command: Command) -> &mut Pipeline {
        self.entries.push((command, false));
        self
    }

    /// Number of commands accumulated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submit the batch and await the reply of every reply-bearing command,
    /// in pipeline order.
    ///
    /// Per-command failures (a server error for one command, say) come back
    /// inside the vector; the `Err` branch of the outer result is reserved
    /// for failures of the submission itself.
    pub async fn execute(&mut self) -> RespResult<Vec<RespResult<Frame>>> {
        let deadline = Instant::now() + self.client.command_timeout();
        let futures = self.enqueue(deadline).await?;
        let mut replies = Vec::with_capacity(futures.len());
        for future in futures.into_iter().flatten() {
            let reply = match timeout_at(deadline, future.wait()).await {
                Ok(reply) => reply,
                Err(_) => Err(RespError::Timeout),
            };
            replies.push(reply);
        }
        Ok(replies)
    }

    /// Submit the batch without awaiting any reply.
    pub async fn fire(&mut self) -> RespResult<()> {
        let deadline = Instant::now() + self.client.command_timeout();
        self.enqueue(deadline).await?;
        Ok(())
    }

    /// Build the queue entries and push them as one submission. Returns the
    /// reply futures (`None` for fire-and-forget slots). The enqueue itself
    /// is bounded by `deadline`: a saturated `Wait`-mode queue must not
    /// park the caller past the command timeout.
    async fn enqueue(&mut self, deadline: Instant) -> RespResult<Vec<Option<ReplyFuture>>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if self.client.is_disposed() {
            self.entries.clear();
            return Err(RespError::Disposed);
        }

        let entries = std::mem::take(&mut self.entries);
        let cancel = CancellationToken::new();
        let mut queue_entries = Vec::with_capacity(entries.len());
        let mut futures = Vec::with_capacity(entries.len());
        for (command, expects_reply) in entries {
            let (reply, future) = pending_reply(command.name());
            queue_entries.push(QueueEntry {
                command: command.bytes().clone(),
                reply,
                cancel: cancel.clone(),
            });
            futures.push(expects_reply.then_some(future));
        }

        match timeout_at(
            deadline,
            self.client.queue().push(Submission::Batch(queue_entries)),
        )
        .await
        {
            Ok(()) => Ok(futures),
            Err(_) => Err(RespError::Timeout),
        }
    }
}
