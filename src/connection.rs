// ABOUTME: The Endpoint: one persistent TCP connection with independent writer and reader tasks
// ABOUTME: Implements handshake, write coalescing, the in-flight reply FIFO and fault fan-out

use crate::client::config::ClientConfig;
use crate::client::error::{RespError, RespResult};
use crate::codec;
use crate::command::Command;
use crate::frame::Frame;
use crate::queue::PendingReply;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Capacity of the per-endpoint batch hand-off channel (batches, not
/// commands). Small on purpose: the submission queue is where depth lives.
const BATCH_CHANNEL_CAPACITY: usize = 8;

/// Lifecycle of an endpoint.
///
/// ```text
/// Connecting -> Ready -> Draining -> Closed        graceful shutdown
///      |          |
///      +----------+--> Faulted -> Closed           fatal I/O or protocol error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointState {
    Connecting = 0,
    Ready = 1,
    Draining = 2,
    Faulted = 3,
    Closed = 4,
}

impl EndpointState {
    fn from_u8(value: u8) -> EndpointState {
        match value {
            0 => EndpointState::Connecting,
            1 => EndpointState::Ready,
            2 => EndpointState::Draining,
            3 => EndpointState::Faulted,
            _ => EndpointState::Closed,
        }
    }
}

/// State shared between an endpoint's tasks and the pool that owns it.
#[derive(Debug)]
pub struct EndpointShared {
    /// Slot index within the pool; stable across reconnects.
    pub id: usize,
    state: AtomicU8,
    /// Incremented once per (re)connect.
    epoch: AtomicU64,
    /// Debugging sequence id, incremented per command written.
    seq: AtomicU64,
    in_flight: AtomicUsize,
    /// Pool-level notifier poked on every state change.
    state_changed: Arc<Notify>,
}

impl EndpointShared {
    pub fn new(id: usize, state_changed: Arc<Notify>) -> EndpointShared {
        EndpointShared {
            id,
            state: AtomicU8::new(EndpointState::Connecting as u8),
            epoch: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            state_changed,
        }
    }

    pub fn state(&self) -> EndpointState {
        EndpointState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, next: EndpointState) {
        let prev = self.state.swap(next as u8, Ordering::AcqRel);
        if prev != next as u8 {
            debug!(
                endpoint = self.id,
                epoch = self.epoch(),
                from = ?EndpointState::from_u8(prev),
                to = ?next,
                "endpoint state change"
            );
            self.state_changed.notify_waiters();
        }
    }

    /// Move to `next` only if currently in `expect`; used for Ready ->
    /// Draining so a fault is never overwritten.
    pub fn transition(&self, expect: EndpointState, next: EndpointState) -> bool {
        let swapped = self
            .state
            .compare_exchange(
                expect as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if swapped {
            debug!(
                endpoint = self.id,
                epoch = self.epoch(),
                from = ?expect,
                to = ?next,
                "endpoint state change"
            );
            self.state_changed.notify_waiters();
        }
        swapped
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::AcqRel)
    }
}

/// One command handed to an endpoint writer: frozen bytes plus the reply
/// slot that the reader will eventually fulfil.
#[derive(Debug)]
pub struct WriteEntry {
    pub bytes: Bytes,
    pub reply: PendingReply,
}

/// A contiguous batch of entries. Pipelines arrive as one batch and are
/// written back-to-back, which is what preserves their atomicity on the
/// wire.
pub type WriteBatch = Vec<WriteEntry>;

/// Open the TCP connection for one endpoint: resolve, apply socket options,
/// connect within the configured bound, then run the handshake.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    config: &ClientConfig,
) -> RespResult<TcpStream> {
    let mut addrs = lookup_host((host, port)).await?;
    let addr = addrs.next().ok_or_else(|| RespError::Transport {
        kind: io::ErrorKind::NotFound,
        message: format!("no addresses resolved for {host}:{port}"),
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_send_buffer_size(config.socket_send_buffer)?;
    socket.set_recv_buffer_size(config.socket_recv_buffer)?;

    let stream = timeout(config.connect_timeout, socket.connect(addr))
        .await
        .map_err(|_| RespError::Transport {
            kind: io::ErrorKind::TimedOut,
            message: format!("connect to {addr} timed out"),
        })??;
    stream.set_nodelay(true)?;

    let mut stream = stream;
    handshake(&mut stream, config).await?;
    Ok(stream)
}

/// Issue the configured handshake commands and validate each reply before
/// the endpoint is allowed to become Ready.
async fn handshake(stream: &mut TcpStream, config: &ClientConfig) -> RespResult<()> {
    let mut steps: Vec<Command> = Vec::new();
    if config.use_resp3 {
        match (&config.auth_username, &config.auth_password) {
            (Some(user), Some(pass)) => steps.push(Command::hello_auth(3, user, pass)),
            (None, Some(pass)) => steps.push(Command::hello_auth(3, "default", pass)),
            _ => steps.push(Command::hello(3)),
        }
    } else if let Some(pass) = &config.auth_password {
        match &config.auth_username {
            Some(user) => steps.push(Command::auth_user(user, pass)),
            None => steps.push(Command::auth(pass)),
        }
    }
    if let Some(db) = config.select_db {
        steps.push(Command::select(db));
    }

    if steps.is_empty() {
        return Ok(());
    }

    let mut buf = BytesMut::with_capacity(4 * 1024);
    for command in steps {
        stream.write_all(command.bytes()).await?;
        let reply = read_reply(stream, &mut buf).await?;
        match reply {
            Frame::Error(message) => {
                return Err(RespError::from_error_frame(&message));
            }
            other => {
                trace!(command = command.name(), reply = %other, "handshake step ok");
            }
        }
    }
    Ok(())
}

/// Read exactly one reply frame. Only used during the handshake; steady
/// state reads happen in the reader task's decode loop.
async fn read_reply(stream: &mut TcpStream, buf: &mut BytesMut) -> RespResult<Frame> {
    loop {
        let decoded = match codec::try_read(&buf[..])? {
            Some((frame, used)) => Some((frame.to_owned(), used)),
            None => None,
        };
        if let Some((frame, used)) = decoded {
            buf.advance(used);
            return Ok(frame);
        }
        if 0 == stream.read_buf(buf).await? {
            return Err(RespError::Transport {
                kind: io::ErrorKind::UnexpectedEof,
                message: "connection closed during handshake".into(),
            });
        }
    }
}

/// Drive one connected socket until it drains or faults.
///
/// Spawns the two long-lived tasks of the endpoint (writer, reader) and
/// waits for both. `Ok(())` is a graceful drain; `Err` carries the fault
/// that was already fanned out to every in-flight reply slot.
pub(crate) async fn run_connection(
    stream: TcpStream,
    shared: Arc<EndpointShared>,
    config: ClientConfig,
    batch_rx: mpsc::Receiver<WriteBatch>,
) -> RespResult<()> {
    let (read_half, write_half) = stream.into_split();
    let (fifo_tx, fifo_rx) = mpsc::channel::<PendingReply>(config.in_flight_limit);

    // First fault wins; the token wakes the peer task so it can drain.
    let fault_reason: Arc<OnceLock<RespError>> = Arc::new(OnceLock::new());
    let faulted = CancellationToken::new();
    let writer_done = CancellationToken::new();

    let writer = tokio::spawn(write_loop(
        write_half,
        batch_rx,
        fifo_tx,
        shared.clone(),
        config.clone(),
        fault_reason.clone(),
        faulted.clone(),
        writer_done.clone(),
    ));
    let reader = tokio::spawn(read_loop(
        read_half,
        fifo_rx,
        shared.clone(),
        config.clone(),
        fault_reason.clone(),
        faulted.clone(),
        writer_done,
    ));

    let (writer, reader) = tokio::join!(writer, reader);
    let writer = writer.unwrap_or_else(|join_err| {
        Err(RespError::Transport {
            kind: io::ErrorKind::Other,
            message: format!("writer task failed: {join_err}"),
        })
    });
    let reader = reader.unwrap_or_else(|join_err| {
        Err(RespError::Transport {
            kind: io::ErrorKind::Other,
            message: format!("reader task failed: {join_err}"),
        })
    });

    // The reader owns fault fan-out, so its error is the authoritative one.
    reader.and(writer)
}

/// The writer half: drains the endpoint's private submission channel,
/// pushes one reply slot per command onto the in-flight FIFO, coalesces the
/// pre-encoded bytes, and flushes.
///
/// Coalescing stops at `max_batch_bytes` or `max_batch_count` per flush,
/// whichever comes first; an empty channel flushes whatever is pending
/// without waiting.
#[allow(clippy::too_many_arguments)]
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut batch_rx: mpsc::Receiver<WriteBatch>,
    fifo_tx: mpsc::Sender<PendingReply>,
    shared: Arc<EndpointShared>,
    config: ClientConfig,
    fault_reason: Arc<OnceLock<RespError>>,
    faulted: CancellationToken,
    writer_done: CancellationToken,
) -> RespResult<()> {
    let buffer_pool = config.pool_or_global();
    let mut buf = buffer_pool.rent();

    let result: RespResult<()> = loop {
        let first = tokio::select! {
            biased;
            _ = faulted.cancelled() => break Ok(()),
            batch = batch_rx.recv() => match batch {
                Some(batch) => batch,
                // Channel closed: the pool is draining this endpoint.
                None => break Ok(()),
            },
        };

        buf.clear();
        let mut count = 0usize;
        if let Err(err) = stage_batch(
            &mut write_half,
            &mut buf,
            &fifo_tx,
            &shared,
            &config,
            first,
            &mut count,
            &fault_reason,
        )
        .await
        {
            break Err(err);
        }

        // Coalesce whatever else is immediately available, up to the flush
        // thresholds.
        let mut staging_failed = None;
        while count < config.max_batch_count && buf.len() < config.max_batch_bytes {
            match batch_rx.try_recv() {
                Ok(batch) => {
                    if let Err(err) = stage_batch(
                        &mut write_half,
                        &mut buf,
                        &fifo_tx,
                        &shared,
                        &config,
                        batch,
                        &mut count,
                        &fault_reason,
                    )
                    .await
                    {
                        staging_failed = Some(err);
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        if let Some(err) = staging_failed {
            break Err(err);
        }

        if !buf.is_empty() {
            trace!(
                endpoint = shared.id,
                commands = count,
                bytes = buf.len(),
                "flushing write batch"
            );
            if let Err(err) = write_half.write_all(&buf).await {
                break Err(RespError::from(err));
            }
        }
    };

    match &result {
        Ok(()) => {
            // Graceful drain: stop accepting work, half-close the socket and
            // let the reader finish collecting outstanding replies.
            shared.transition(EndpointState::Ready, EndpointState::Draining);
            let _ = write_half.shutdown().await;
        }
        Err(err) => {
            let _ = fault_reason.set(err.clone());
            shared.set_state(EndpointState::Faulted);
            faulted.cancel();
        }
    }

    // Fail anything still parked in the hand-off channel; those commands
    // were never written, but this endpoint can no longer take them.
    batch_rx.close();
    let err = fault_reason
        .get()
        .cloned()
        .unwrap_or_else(|| RespError::Transport {
            kind: io::ErrorKind::BrokenPipe,
            message: "endpoint shut down before write".into(),
        });
    while let Ok(batch) = batch_rx.try_recv() {
        for entry in batch {
            entry.reply.resolve(Err(err.clone()));
        }
    }

    writer_done.cancel();
    result
}

/// Stage one batch: reply slots onto the FIFO (in submission order, before
/// any byte is written), bytes into the write buffer. A full FIFO suspends
/// here, which backpressures the batcher through the bounded hand-off
/// channel.
#[allow(clippy::too_many_arguments)]
async fn stage_batch(
    write_half: &mut OwnedWriteHalf,
    buf: &mut BytesMut,
    fifo_tx: &mpsc::Sender<PendingReply>,
    shared: &EndpointShared,
    config: &ClientConfig,
    batch: WriteBatch,
    count: &mut usize,
    fault_reason: &OnceLock<RespError>,
) -> RespResult<()> {
    for entry in batch {
        let seq = shared.next_seq();
        trace!(
            endpoint = shared.id,
            seq,
            command = entry.reply.command(),
            "staging command"
        );
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        if let Err(send_err) = fifo_tx.send(entry.reply).await {
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            let err = fault_reason
                .get()
                .cloned()
                .unwrap_or_else(|| RespError::Transport {
                    kind: io::ErrorKind::BrokenPipe,
                    message: "endpoint reader terminated".into(),
                });
            send_err.0.resolve(Err(err.clone()));
            return Err(err);
        }
        buf.put_slice(&entry.bytes);
        *count += 1;

        // A pathological batch can outgrow the write buffer; flush early
        // rather than keep growing.
        if buf.len() >= config.max_write_buffer {
            write_half.write_all(buf).await?;
            buf.clear();
        }
    }
    Ok(())
}

/// The reader half: reads into a growable buffer, decodes frames in a loop,
/// and fulfils the front reply slot per frame.
///
/// The buffer only advances after the decoded payloads have been copied into
/// the resolved reply value, honouring the codec's borrow rule.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    mut fifo_rx: mpsc::Receiver<PendingReply>,
    shared: Arc<EndpointShared>,
    config: ClientConfig,
    fault_reason: Arc<OnceLock<RespError>>,
    faulted: CancellationToken,
    writer_done: CancellationToken,
) -> RespResult<()> {
    let mut buf = BytesMut::with_capacity(config.socket_recv_buffer as usize);

    enum Decoded {
        Reply(Frame, usize),
        Push(usize),
        Incomplete,
    }

    let result: RespResult<()> = 'connection: loop {
        // Decode until the buffer runs dry.
        loop {
            // The owning copy is taken before the buffer advances, so the
            // zero-copy payload borrows never dangle.
            let step = match codec::try_read(&buf[..]) {
                Ok(Some((frame, used))) if frame.is_push() => Decoded::Push(used),
                Ok(Some((frame, used))) => Decoded::Reply(frame.to_owned(), used),
                Ok(None) => Decoded::Incomplete,
                Err(codec_err) => break 'connection Err(RespError::Protocol(codec_err)),
            };
            let decoded = match step {
                Decoded::Incomplete => break,
                Decoded::Push(used) => {
                    // Push routing is out of scope: parse, log, discard.
                    // No reply slot is consumed.
                    warn!(endpoint = shared.id, "discarding out-of-band push frame");
                    buf.advance(used);
                    continue;
                }
                Decoded::Reply(frame, used) => {
                    buf.advance(used);
                    frame
                }
            };

            match fifo_rx.try_recv() {
                Ok(pending) => {
                    shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                    match decoded {
                        Frame::Error(message) => {
                            pending.resolve(Err(RespError::from_error_frame(&message)));
                        }
                        frame => pending.resolve(Ok(frame)),
                    }
                }
                Err(_) => {
                    // A reply with no request in flight breaks the ordering
                    // invariant; nothing after it can be trusted.
                    break 'connection Err(RespError::Transport {
                        kind: io::ErrorKind::InvalidData,
                        message: "reply received with no request in flight".into(),
                    });
                }
            }
        }

        let read_result = tokio::select! {
            biased;
            _ = faulted.cancelled() => break 'connection Ok(()),
            _ = writer_done.cancelled(), if shared.in_flight() == 0 => {
                // Writer finished and every reply is in: drain complete.
                break 'connection Ok(());
            }
            read = stalled_read(&mut read_half, &mut buf, &shared, &config) => read,
        };

        match read_result {
            Ok(0) => {
                if shared.in_flight() == 0 && writer_done.is_cancelled() && buf.is_empty() {
                    break 'connection Ok(());
                }
                break 'connection Err(RespError::Transport {
                    kind: io::ErrorKind::UnexpectedEof,
                    message: "connection reset by peer".into(),
                });
            }
            Ok(_) => {}
            Err(err) => break 'connection Err(RespError::from(err)),
        }
    };

    if let Err(err) = &result {
        let _ = fault_reason.set(err.clone());
        shared.set_state(EndpointState::Faulted);
        faulted.cancel();
    }

    // Drain the FIFO. On a fault every remaining slot resolves with the
    // fault reason; on a graceful exit the FIFO is already empty and this
    // falls straight through.
    fifo_rx.close();
    if let Some(err) = fault_reason.get() {
        while let Some(pending) = fifo_rx.recv().await {
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            trace!(
                endpoint = shared.id,
                command = pending.command(),
                "draining in-flight slot after fault"
            );
            pending.resolve(Err(err.clone()));
        }
    }

    result
}

/// One socket read. With replies outstanding, a stream that makes no
/// progress for `stall_timeout` is treated as a transport fault.
async fn stalled_read(
    read_half: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    shared: &EndpointShared,
    config: &ClientConfig,
) -> io::Result<usize> {
    if shared.in_flight() > 0 {
        match timeout(config.stall_timeout, read_half.read_buf(buf)).await {
            Ok(read) => read,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "read stream stalled with replies outstanding",
            )),
        }
    } else {
        read_half.read_buf(buf).await
    }
}
