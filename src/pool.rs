// ABOUTME: Fixed-size pool of endpoints with load-policy selection and reconnect supervision
// ABOUTME: Owns one supervisor task per slot running the connect/run/backoff/reconnect loop

use crate::client::config::{ClientConfig, LoadPolicy};
use crate::client::error::{RespError, RespResult};
use crate::connection::{self, EndpointShared, EndpointState, WriteBatch};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of each endpoint's batch hand-off channel.
const BATCH_CHANNEL_CAPACITY: usize = 8;

/// A bounded set of endpoints to one server.
///
/// The pool owns its endpoints exclusively; endpoints never reference the
/// pool back. Selection only ever considers Ready endpoints, and the
/// per-slot supervisor task handles reconnect (with handshake) after a
/// fault, so callers simply see slots leave and re-enter the Ready set.
pub struct Pool {
    slots: Vec<Arc<EndpointSlot>>,
    policy: LoadPolicy,
    rr_cursor: AtomicUsize,
    state_changed: Arc<Notify>,
    acquire_timeout: Duration,
    shutdown: CancellationToken,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    last_error: Arc<Mutex<Option<RespError>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

/// One slot: stable shared state plus the current connection epoch's
/// hand-off channel (absent while not Ready).
pub(crate) struct EndpointSlot {
    pub shared: Arc<EndpointShared>,
    sender: Mutex<Option<mpsc::Sender<WriteBatch>>>,
}

impl EndpointSlot {
    fn sender(&self) -> Option<mpsc::Sender<WriteBatch>> {
        lock(&self.sender).clone()
    }

    fn publish(&self, sender: mpsc::Sender<WriteBatch>) {
        *lock(&self.sender) = Some(sender);
    }

    fn clear(&self) {
        *lock(&self.sender) = None;
    }
}

/// A selected endpoint, valid for one batch hand-off.
pub(crate) struct EndpointRef {
    sender: mpsc::Sender<WriteBatch>,
    pub shared: Arc<EndpointShared>,
}

impl EndpointRef {
    /// Hand a batch to the endpoint writer. On failure (the endpoint died
    /// between selection and hand-off) the batch comes back for the caller
    /// to re-route.
    pub async fn dispatch(&self, batch: WriteBatch) -> Result<(), WriteBatch> {
        self.sender.send(batch).await.map_err(|send_err| send_err.0)
    }
}

impl Pool {
    /// Stand up `connection_count` endpoints toward `host:port` and wait for
    /// the pool to become Ready (at least one Ready endpoint).
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        config: &ClientConfig,
    ) -> RespResult<Arc<Pool>> {
        let state_changed = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let last_error: Arc<Mutex<Option<RespError>>> = Arc::new(Mutex::new(None));

        let slots: Vec<Arc<EndpointSlot>> = (0..config.connection_count)
            .map(|id| {
                Arc::new(EndpointSlot {
                    shared: Arc::new(EndpointShared::new(id, state_changed.clone())),
                    sender: Mutex::new(None),
                })
            })
            .collect();

        let pool = Arc::new(Pool {
            slots: slots.clone(),
            policy: config.load_policy,
            rr_cursor: AtomicUsize::new(0),
            state_changed: state_changed.clone(),
            acquire_timeout: config.acquire_timeout,
            shutdown: shutdown.clone(),
            supervisors: Mutex::new(Vec::new()),
            last_error: last_error.clone(),
        });

        {
            let mut supervisors = lock(&pool.supervisors);
            for slot in slots {
                supervisors.push(tokio::spawn(supervise(
                    slot,
                    host.to_owned(),
                    port,
                    config.clone(),
                    shutdown.clone(),
                    last_error.clone(),
                )));
            }
        }

        pool.wait_until_ready(config.connect_timeout).await?;
        Ok(pool)
    }

    async fn wait_until_ready(&self, limit: Duration) -> RespResult<()> {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.any_ready() {
                return Ok(());
            }
            if self.all_closed() {
                return Err(self.connect_failure());
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(self.connect_failure());
            }
        }
    }

    fn connect_failure(&self) -> RespError {
        lock(&self.last_error)
            .clone()
            .unwrap_or(RespError::NoHealthyEndpoint)
    }

    fn any_ready(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.shared.state() == EndpointState::Ready)
    }

    fn all_closed(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.shared.state() == EndpointState::Closed)
    }

    /// Pick a Ready endpoint under the configured load policy, waiting up to
    /// `acquire_timeout` for one to appear.
    pub(crate) async fn acquire(&self) -> RespResult<EndpointRef> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(endpoint) = self.try_select() {
                return Ok(endpoint);
            }
            if self.shutdown.is_cancelled() {
                return Err(RespError::Disposed);
            }
            if self.all_closed() {
                return Err(RespError::NoHealthyEndpoint);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(RespError::NoHealthyEndpoint);
            }
        }
    }

    fn try_select(&self) -> Option<EndpointRef> {
        match self.policy {
            LoadPolicy::RoundRobin => {
                let len = self.slots.len();
                let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                for offset in 0..len {
                    let slot = &self.slots[(start + offset) % len];
                    if slot.shared.state() == EndpointState::Ready
                        && let Some(sender) = slot.sender()
                    {
                        return Some(EndpointRef {
                            sender,
                            shared: slot.shared.clone(),
                        });
                    }
                }
                None
            }
            LoadPolicy::LeastInFlight => {
                let depths: Vec<Option<usize>> = self
                    .slots
                    .iter()
                    .map(|slot| {
                        (slot.shared.state() == EndpointState::Ready)
                            .then(|| slot.shared.in_flight())
                    })
                    .collect();
                let candidates = least_loaded(&depths);
                if candidates.is_empty() {
                    return None;
                }
                let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())];
                let slot = &self.slots[pick];
                let sender = slot.sender()?;
                Some(EndpointRef {
                    sender,
                    shared: slot.shared.clone(),
                })
            }
        }
    }

    /// Snapshot of each slot's state, in slot order.
    pub fn states(&self) -> Vec<EndpointState> {
        self.slots.iter().map(|slot| slot.shared.state()).collect()
    }

    /// Drain and close every endpoint, then wait for the supervisors.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.cancel();
        for slot in &self.slots {
            slot.shared
                .transition(EndpointState::Ready, EndpointState::Draining);
            // Dropping the sender closes the writer's channel, which is the
            // drain signal.
            slot.clear();
        }
        let handles: Vec<JoinHandle<()>> = lock(&self.supervisors).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Indices holding the minimum in-flight depth among Ready slots.
fn least_loaded(depths: &[Option<usize>]) -> Vec<usize> {
    let min = depths.iter().flatten().min().copied();
    match min {
        Some(min) => depths
            .iter()
            .enumerate()
            .filter_map(|(index, depth)| (*depth == Some(min)).then_some(index))
            .collect(),
        None => Vec::new(),
    }
}

/// Per-slot supervisor: connect, hand the socket to the endpoint tasks, and
/// on fault apply exponential backoff with jitter before reconnecting.
async fn supervise(
    slot: Arc<EndpointSlot>,
    host: String,
    port: u16,
    config: ClientConfig,
    shutdown: CancellationToken,
    last_error: Arc<Mutex<Option<RespError>>>,
) {
    let shared = slot.shared.clone();
    let mut attempts: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        shared.set_state(EndpointState::Connecting);

        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connection::connect(&host, port, &config) => result,
        };

        match connected {
            Ok(stream) => {
                attempts = 0;
                let epoch = shared.next_epoch();
                info!(endpoint = shared.id, epoch, host = %host, port, "endpoint connected");

                let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
                slot.publish(batch_tx);
                shared.set_state(EndpointState::Ready);

                let result =
                    connection::run_connection(stream, shared.clone(), config.clone(), batch_rx)
                        .await;
                slot.clear();

                match result {
                    Ok(()) => break,
                    Err(err) => {
                        warn!(endpoint = shared.id, epoch, error = %err, "endpoint faulted");
                        *lock(&last_error) = Some(err.clone());
                        if let Some(observer) = &config.fault_observer {
                            observer(shared.id, &err);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(endpoint = shared.id, error = %err, "endpoint connect failed");
                *lock(&last_error) = Some(err.clone());
                if let Some(observer) = &config.fault_observer {
                    observer(shared.id, &err);
                }
                shared.set_state(EndpointState::Faulted);
            }
        }

        if !config.auto_reconnect || shutdown.is_cancelled() {
            break;
        }
        attempts += 1;
        if let Some(max) = config.reconnect_max_attempts
            && attempts > max
        {
            warn!(endpoint = shared.id, attempts, "reconnect attempts exhausted");
            break;
        }

        let delay = backoff_delay(attempts, &config);
        debug!(endpoint = shared.id, attempt = attempts, ?delay, "reconnect backoff");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    shared.set_state(EndpointState::Closed);
}

/// Exponential backoff from the configured base, capped, with ±20% jitter.
fn backoff_delay(attempt: u32, config: &ClientConfig) -> Duration {
    let base = (config.reconnect_backoff_base.as_millis() as u64).max(1);
    let shift = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u64 << shift);
    let capped = raw.min(config.reconnect_backoff_cap.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis(((capped as f64) * jitter) as u64)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
