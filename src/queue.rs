// ABOUTME: Bounded MPSC submission queue decoupling callers from endpoints, plus the batcher task
// ABOUTME: Queue items are tagged structs (bytes, reply slot, cancel token) - no boxed callbacks

use crate::client::config::{ClientConfig, FullMode};
use crate::client::error::{RespError, RespResult};
use crate::connection::WriteEntry;
use crate::frame::Frame;
use crate::pool::Pool;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A single-assignment slot for one outstanding server reply.
///
/// Created when a command is enqueued and resolved exactly once: by the
/// endpoint reader on a reply, by the endpoint drainer on a fault, or by the
/// queue itself when a submission is evicted or the client is disposed. The
/// command name rides along for logs.
#[derive(Debug)]
pub struct PendingReply {
    tx: oneshot::Sender<RespResult<Frame>>,
    command: &'static str,
}

impl PendingReply {
    /// Fulfil the slot. If the caller already stopped waiting (timeout,
    /// cancellation, fire-and-forget) the reply is silently discarded.
    pub fn resolve(self, reply: RespResult<Frame>) {
        let _ = self.tx.send(reply);
    }

    /// The command keyword this slot belongs to.
    pub fn command(&self) -> &'static str {
        self.command
    }
}

/// The caller-side half of a [`PendingReply`].
#[derive(Debug)]
pub struct ReplyFuture {
    rx: oneshot::Receiver<RespResult<Frame>>,
}

impl ReplyFuture {
    /// Wait for the slot to be fulfilled.
    pub async fn wait(self) -> RespResult<Frame> {
        match self.rx.await {
            Ok(reply) => reply,
            // The slot vanished without being resolved; only reachable when
            // the owning tasks were torn down.
            Err(_) => Err(RespError::Disposed),
        }
    }
}

/// Create a linked reply slot and caller future.
pub fn pending_reply(command: &'static str) -> (PendingReply, ReplyFuture) {
    let (tx, rx) = oneshot::channel();
    (PendingReply { tx, command }, ReplyFuture { rx })
}

/// One command waiting in the submission queue.
#[derive(Debug)]
pub struct QueueEntry {
    pub command: Bytes,
    pub reply: PendingReply,
    pub cancel: CancellationToken,
}

/// What the queue holds: either a lone command or a pipeline batch that must
/// land contiguously on one endpoint.
#[derive(Debug)]
pub enum Submission {
    One(QueueEntry),
    Batch(Vec<QueueEntry>),
}

impl Submission {
    /// Number of commands carried.
    pub fn len(&self) -> usize {
        match self {
            Submission::One(_) => 1,
            Submission::Batch(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_entries(self) -> Vec<QueueEntry> {
        match self {
            Submission::One(entry) => vec![entry],
            Submission::Batch(entries) => entries,
        }
    }

    /// Resolve every carried reply with the same error. Used for eviction,
    /// rejection and disposal, where the whole submission fails as a unit.
    fn resolve_all(self, err: &RespError) {
        match self {
            Submission::One(entry) => entry.reply.resolve(Err(err.clone())),
            Submission::Batch(entries) => {
                for entry in entries {
                    entry.reply.resolve(Err(err.clone()));
                }
            }
        }
    }
}

/// The process-wide bounded submission queue.
///
/// Multi-producer: any number of caller tasks push. Single-consumer: the
/// batcher drains. Capacity is counted in submissions; a pipeline occupies
/// one slot so that the `DropOldest` policy can only ever evict it whole.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    deque: Mutex<VecDeque<Submission>>,
    space: Semaphore,
    items: Notify,
    full_mode: FullMode,
    closed: AtomicBool,
}

impl CommandQueue {
    pub fn new(capacity: usize, full_mode: FullMode) -> CommandQueue {
        CommandQueue {
            inner: Arc::new(QueueInner {
                deque: Mutex::new(VecDeque::new()),
                space: Semaphore::new(capacity),
                items: Notify::new(),
                full_mode,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a submission.
    ///
    /// Never returns an error: failures (queue full, disposed, evicted) are
    /// delivered through the submission's reply futures, so fire-and-forget
    /// and awaited submissions behave identically.
    pub async fn push(&self, submission: Submission) {
        if self.inner.closed.load(Ordering::Acquire) {
            submission.resolve_all(&RespError::Disposed);
            return;
        }

        match self.inner.full_mode {
            FullMode::Wait => match self.inner.space.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    submission.resolve_all(&RespError::Disposed);
                    return;
                }
            },
            FullMode::Reject => match self.inner.space.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(tokio::sync::TryAcquireError::NoPermits) => {
                    submission.resolve_all(&RespError::QueueFull);
                    return;
                }
                Err(tokio::sync::TryAcquireError::Closed) => {
                    submission.resolve_all(&RespError::Disposed);
                    return;
                }
            },
            FullMode::DropOldest => match self.inner.space.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(tokio::sync::TryAcquireError::NoPermits) => {
                    // Trade the oldest queued submission for ours; its slot
                    // (permit) transfers, so the semaphore stays balanced.
                    let evicted = {
                        let mut deque = lock(&self.inner.deque);
                        deque.pop_front()
                    };
                    match evicted {
                        Some(old) => {
                            debug!(dropped = old.len(), "queue full, evicting oldest");
                            old.resolve_all(&RespError::Dropped);
                        }
                        None => {
                            // Everything queued is already with the batcher;
                            // nothing to evict, so wait like `Wait` would.
                            match self.inner.space.acquire().await {
                                Ok(permit) => permit.forget(),
                                Err(_) => {
                                    submission.resolve_all(&RespError::Disposed);
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(tokio::sync::TryAcquireError::Closed) => {
                    submission.resolve_all(&RespError::Disposed);
                    return;
                }
            },
        }

        lock(&self.inner.deque).push_back(submission);
        self.inner.items.notify_one();
    }

    /// Take the oldest submission, releasing its capacity slot.
    pub(crate) fn pop(&self) -> Option<Submission> {
        let submission = lock(&self.inner.deque).pop_front();
        if submission.is_some() {
            self.inner.space.add_permits(1);
        }
        submission
    }

    pub(crate) async fn wait_items(&self) {
        self.inner.items.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the queue: pending and future `push` calls resolve `Disposed`;
    /// already-queued submissions remain for the batcher to flush.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.space.close();
        self.inner.items.notify_waiters();
    }

    /// Queued submissions right now. Exposed for tests and metrics.
    pub fn depth(&self) -> usize {
        lock(&self.inner.deque).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The batcher: drains the queue and coalesces submissions toward endpoints.
///
/// Per tick it waits for the queue to be non-empty, then keeps draining until
/// `batch_size` commands are in hand or `batch_timeout` elapses, and hands
/// the whole tick's worth to a single endpoint so the writer can coalesce
/// them into one flush.
pub(crate) async fn run_batcher(queue: CommandQueue, pool: Arc<Pool>, config: ClientConfig) {
    loop {
        // Block until something is queued; exit once closed and drained.
        let first = loop {
            match queue.pop() {
                Some(submission) => break submission,
                None => {
                    if queue.is_closed() {
                        debug!("batcher exiting: queue closed and drained");
                        return;
                    }
                    queue.wait_items().await;
                }
            }
        };

        let mut count = first.len();
        let mut batch = vec![first];
        let deadline = Instant::now() + config.batch_timeout;
        while count < config.batch_size {
            match queue.pop() {
                Some(submission) => {
                    count += submission.len();
                    batch.push(submission);
                }
                None => {
                    if queue.is_closed() {
                        break;
                    }
                    if timeout_at(deadline, queue.wait_items()).await.is_err() {
                        break;
                    }
                }
            }
        }

        dispatch(batch, &pool).await;
    }
}

/// Hand one tick's batch to an endpoint, resolving cancelled entries along
/// the way.
async fn dispatch(batch: Vec<Submission>, pool: &Pool) {
    let mut entries: Vec<WriteEntry> = Vec::new();
    for submission in batch {
        for entry in submission.into_entries() {
            // Pre-write cancellation: the command never reaches a socket.
            if entry.cancel.is_cancelled() {
                entry.reply.resolve(Err(RespError::Cancelled));
            } else {
                entries.push(WriteEntry {
                    bytes: entry.command,
                    reply: entry.reply,
                });
            }
        }
    }
    if entries.is_empty() {
        return;
    }

    // The chosen endpoint can fault between acquire and hand-off; one
    // re-acquire covers that window, since nothing has been written yet.
    for _ in 0..2 {
        match pool.acquire().await {
            Ok(endpoint) => match endpoint.dispatch(entries).await {
                Ok(()) => return,
                Err(returned) => entries = returned,
            },
            Err(err) => {
                for entry in entries {
                    entry.reply.resolve(Err(err.clone()));
                }
                return;
            }
        }
    }
    for entry in entries {
        entry.reply.resolve(Err(RespError::NoHealthyEndpoint));
    }
}
