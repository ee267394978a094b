//! Reusable byte buffers for channel framing.
//!
//! Every frame read and every response encode borrows a [`PooledBuffer`].
//! Dropping it clears the buffer and returns it to the pool unless the pool
//! already holds `capacity` buffers. Buffers that grew past
//! `max_retained` bytes are dropped instead of being kept around.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

const INITIAL_CAPACITY: usize = 4 * 1024;

/// Bounded pool of [`BytesMut`] buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
    max_retained: usize,
}

impl BufferPool {
    /// Creates a pool keeping at most `capacity` idle buffers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_max_retained(capacity, 1024 * 1024)
    }

    /// Creates a pool that also drops buffers larger than `max_retained`.
    #[must_use]
    pub fn with_max_retained(capacity: usize, max_retained: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                max_retained,
            }),
        }
    }

    /// Borrows a cleared buffer.
    #[must_use]
    pub fn get(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY));
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("idle", &self.idle())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() > self.pool.max_retained {
            return;
        }
        buf.clear();
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.capacity {
            free.push(buf);
        }
    }
}
