// ABOUTME: Client configuration: pool sizing, batching, timeouts, reconnect and handshake options
// ABOUTME: Builder-style setters with defaults that suit a general-purpose deployment

use crate::buffer::BufferPool;
use crate::client::error::RespError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Behaviour of `submit` when the command queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullMode {
    /// Suspend the submitter until space frees up (backpressure).
    #[default]
    Wait,
    /// Evict the oldest queued submission, resolving its replies with
    /// `Dropped`. Pipelines are evicted whole, never split.
    DropOldest,
    /// Fail the new submission immediately with `QueueFull`.
    Reject,
}

/// How the pool picks an endpoint for each drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// Rotate across Ready endpoints.
    #[default]
    RoundRobin,
    /// Pick the Ready endpoint with the fewest replies outstanding; ties
    /// break randomly.
    LeastInFlight,
}

/// Preset batching profiles mapping onto `batch_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProfile {
    /// 1 ms aggregation window.
    Default,
    /// 100 µs window: favour per-command latency.
    LowLatency,
    /// 10 ms window: favour syscall amortisation.
    HighThroughput,
}

impl BatchProfile {
    pub fn batch_timeout(self) -> Duration {
        match self {
            BatchProfile::Default => Duration::from_millis(1),
            BatchProfile::LowLatency => Duration::from_micros(100),
            BatchProfile::HighThroughput => Duration::from_millis(10),
        }
    }
}

/// Callback invoked whenever an endpoint faults: `(endpoint id, error)`.
///
/// Runs on the faulting endpoint's task; keep it cheap.
pub type FaultObserver = Arc<dyn Fn(usize, &RespError) + Send + Sync>;

/// Configuration for a [`Client`](crate::client::Client) and everything it
/// owns.
///
/// # Example
///
/// ```rust
/// use respipe::{BatchProfile, ClientConfig, LoadPolicy};
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_connection_count(8)
///     .with_profile(BatchProfile::LowLatency)
///     .with_load_policy(LoadPolicy::LeastInFlight)
///     .with_command_timeout(Duration::from_secs(2));
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Number of endpoints in the pool.
    pub connection_count: usize,
    /// Maximum commands drained from the queue per batcher tick.
    pub batch_size: usize,
    /// Aggregation window per batcher tick.
    pub batch_timeout: Duration,
    /// Capacity of the submission queue, in submissions.
    pub queue_capacity: usize,
    /// What `submit` does when the queue is full.
    pub full_mode: FullMode,
    /// Bound on TCP connect plus handshake.
    pub connect_timeout: Duration,
    /// Bound on each command's reply; expiry is non-fatal to the endpoint.
    pub command_timeout: Duration,
    /// Bound on waiting for a Ready endpoint.
    pub acquire_timeout: Duration,
    /// With replies outstanding, a read stream idle for this long faults the
    /// endpoint.
    pub stall_timeout: Duration,
    /// Whether faulted endpoints are reconnected automatically.
    pub auto_reconnect: bool,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_backoff_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_backoff_cap: Duration,
    /// Give up reconnecting after this many attempts (`None` = never).
    pub reconnect_max_attempts: Option<u32>,
    /// ACL username for `AUTH`/`HELLO AUTH`.
    pub auth_username: Option<String>,
    /// Password for `AUTH`/`HELLO AUTH`.
    pub auth_password: Option<String>,
    /// Logical database selected during the handshake.
    pub select_db: Option<u32>,
    /// Negotiate RESP3 via `HELLO 3` during the handshake.
    pub use_resp3: bool,
    /// Endpoint selection policy.
    pub load_policy: LoadPolicy,
    /// Writer flush threshold, bytes.
    pub max_batch_bytes: usize,
    /// Writer flush threshold, commands.
    pub max_batch_count: usize,
    /// Per-endpoint bound on replies outstanding; a full FIFO backpressures
    /// the writer.
    pub in_flight_limit: usize,
    /// Write buffer size past which the writer flushes early.
    pub max_write_buffer: usize,
    /// Kernel send buffer size applied before connect.
    pub socket_send_buffer: u32,
    /// Kernel receive buffer size applied before connect.
    pub socket_recv_buffer: u32,
    /// Buffer pool; `None` uses the process-wide pool.
    pub buffer_pool: Option<BufferPool>,
    /// Observer notified of endpoint faults.
    pub fault_observer: Option<FaultObserver>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connection_count: 4,
            batch_size: 100,
            batch_timeout: Duration::from_millis(1),
            queue_capacity: 10_000,
            full_mode: FullMode::Wait,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_backoff_base: Duration::from_millis(100),
            reconnect_backoff_cap: Duration::from_secs(30),
            reconnect_max_attempts: None,
            auth_username: None,
            auth_password: None,
            select_db: None,
            use_resp3: false,
            load_policy: LoadPolicy::RoundRobin,
            max_batch_bytes: 64 * 1024,
            max_batch_count: 256,
            in_flight_limit: 4096,
            max_write_buffer: 1024 * 1024,
            socket_send_buffer: 64 * 1024,
            socket_recv_buffer: 64 * 1024,
            buffer_pool: None,
            fault_observer: None,
        }
    }
}

impl ClientConfig {
    pub fn with_connection_count(mut self, count: usize) -> Self {
        self.connection_count = count.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Apply one of the preset batching profiles.
    pub fn with_profile(mut self, profile: BatchProfile) -> Self {
        self.batch_timeout = profile.batch_timeout();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_full_mode(mut self, mode: FullMode) -> Self {
        self.full_mode = mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.reconnect_backoff_base = base;
        self.reconnect_backoff_cap = cap;
        self
    }

    pub fn with_reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = Some(attempts);
        self
    }

    pub fn with_auth(mut self, username: Option<&str>, password: &str) -> Self {
        self.auth_username = username.map(str::to_owned);
        self.auth_password = Some(password.to_owned());
        self
    }

    pub fn with_select_db(mut self, db: u32) -> Self {
        self.select_db = Some(db);
        self
    }

    pub fn with_resp3(mut self, enabled: bool) -> Self {
        self.use_resp3 = enabled;
        self
    }

    pub fn with_load_policy(mut self, policy: LoadPolicy) -> Self {
        self.load_policy = policy;
        self
    }

    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    pub fn with_fault_observer(
        mut self,
        observer: impl Fn(usize, &RespError) + Send + Sync + 'static,
    ) -> Self {
        self.fault_observer = Some(Arc::new(observer));
        self
    }

    /// The buffer pool this client rents from.
    pub fn pool_or_global(&self) -> BufferPool {
        self.buffer_pool
            .clone()
            .unwrap_or_else(|| BufferPool::global().clone())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ClientConfig")
            .field("connection_count", &self.connection_count)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout", &self.batch_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("full_mode", &self.full_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("use_resp3", &self.use_resp3)
            .field("load_policy", &self.load_policy)
            .field("fault_observer", &self.fault_observer.is_some())
            .finish_non_exhaustive()
    }
}
