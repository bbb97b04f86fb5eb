// ABOUTME: Pooled byte buffers backing the codec and the per-endpoint I/O paths
// ABOUTME: Provides a process-wide default pool plus isolated pools for tests and multi-tenant use

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock};

/// Default capacity of a freshly allocated pooled buffer.
const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Buffers that grew beyond this are dropped instead of shelved, so one
/// oversized reply cannot pin memory for the life of the pool.
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// How many idle buffers a pool keeps around.
const MAX_SHELVED: usize = 64;

/// A shelf of reusable [`BytesMut`] buffers.
///
/// Encoding a command and coalescing a write batch both need a scratch
/// buffer for a short, bursty moment. Renting from a pool keeps those
/// allocations off the per-command hot path.
///
/// A process-wide pool is available through [`BufferPool::global`]. Callers
/// that need isolation (tests, multi-tenant processes) can construct their
/// own pool and hand it to the client via configuration; the two never share
/// shelves.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    shelf: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Create an isolated pool whose fresh buffers have `buffer_capacity`.
    pub fn new(buffer_capacity: usize) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                shelf: Mutex::new(Vec::new()),
                buffer_capacity,
            }),
        }
    }

    /// The process-wide default pool.
    pub fn global() -> &'static BufferPool {
        static GLOBAL: OnceLock<BufferPool> = OnceLock::new();
        GLOBAL.get_or_init(|| BufferPool::new(DEFAULT_BUFFER_CAPACITY))
    }

    /// Rent a cleared buffer from the pool.
    ///
    /// The buffer returns to the shelf when the guard is dropped, unless it
    /// grew past the retain cap, in which case it is simply freed.
    pub fn rent(&self) -> PooledBuf {
        let buf = {
            let mut shelf = self
                .inner
                .shelf
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            shelf.pop()
        };
        let buf = buf.unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));
        PooledBuf {
            pool: self.inner.clone(),
            buf: Some(buf),
        }
    }

    /// Number of buffers currently shelved. Exposed for tests and metrics.
    pub fn idle(&self) -> usize {
        self.inner
            .shelf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl PoolInner {
    fn give_back(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut shelf = self
            .shelf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if shelf.len() < MAX_SHELVED {
            shelf.push(buf);
        }
    }
}

/// A rented buffer. Derefs to [`BytesMut`] and is returned to its pool on
/// drop.
#[derive(Debug)]
pub struct PooledBuf {
    pool: Arc<PoolInner>,
    buf: Option<BytesMut>,
}

impl PooledBuf {
    /// Detach the underlying buffer from the pool. The buffer will not be
    /// shelved again; use this when freezing encoded bytes for a command.
    pub fn into_inner(mut self) -> BytesMut {
        self.buf.take().expect("buffer present until drop")
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn rent_returns_cleared_buffer() {
        let pool = BufferPool::new(64);
        {
            let mut buf = pool.rent();
            buf.put_slice(b"hello");
            assert_eq!(buf.len(), 5);
        }
        // The buffer went back to the shelf and comes out empty.
        assert_eq!(pool.idle(), 1);
        let buf = pool.rent();
        assert!(buf.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn oversized_buffers_are_not_shelved() {
        let pool = BufferPool::new(64);
        {
            let mut buf = pool.rent();
            buf.reserve(MAX_RETAINED_CAPACITY + 1);
        }
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn into_inner_detaches_from_pool() {
        let pool = BufferPool::new(64);
        let buf = pool.rent();
        let _detached = buf.into_inner();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn pools_are_isolated() {
        let a = BufferPool::new(64);
        let b = BufferPool::new(64);
        drop(a.rent());
        assert_eq!(a.idle(), 1);
        assert_eq!(b.idle(), 0);
    }

    #[test]
    fn global_pool_is_a_singleton() {
        let first = BufferPool::global();
        let second = BufferPool::global();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }
}
