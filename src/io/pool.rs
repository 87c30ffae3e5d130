//! Reusable byte buffers shared by every connection.
//!
//! The pool is split into shards, and each connection is pinned to one
//! shard when it is accepted. A shard is a bounded lock-free queue, so
//! leasing and returning never take a lock. A lease is a [`PooledBuf`]
//! guard that hands its buffer back on drop, on every exit path.

use crossbeam::queue::ArrayQueue;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

/// Buffers that grew past this capacity are dropped instead of pooled.
pub const MAX_POOLED_CAPACITY: usize = 32 * 1024;

/// Idle buffers kept per shard.
pub const MAX_IDLE_PER_SHARD: usize = 24;

/// Sharded free list of growable byte buffers.
///
/// # Examples
/// ```
/// use wireline::BufferPool;
///
/// let pool = BufferPool::new(2);
/// let shard = pool.assign_shard();
///
/// let mut buf = pool.lease(shard, 512);
/// buf.extend_from_slice(b"hello");
/// drop(buf);
///
/// // the returned buffer comes back empty
/// assert!(pool.lease(shard, 0).is_empty());
/// ```
pub struct BufferPool {
    shards: Box<[ArrayQueue<Vec<u8>>]>,
    next_shard: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool with `shards` free lists (at least one).
    pub fn new(shards: usize) -> Arc<Self> {
        let shards = (0..shards.max(1))
            .map(|_| ArrayQueue::new(MAX_IDLE_PER_SHARD))
            .collect();

        Arc::new(Self {
            shards,
            next_shard: AtomicUsize::new(0),
        })
    }

    /// One shard per available CPU.
    pub fn per_cpu() -> Arc<Self> {
        Self::new(thread::available_parallelism().map_or(1, |n| n.get()))
    }

    /// Picks the shard for a new connection, round-robin.
    #[inline]
    pub fn assign_shard(&self) -> usize {
        self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len()
    }

    /// Takes an empty buffer with at least `capacity` bytes reserved.
    pub fn lease(self: &Arc<Self>, shard: usize, capacity: usize) -> PooledBuf {
        let shard = shard % self.shards.len();
        let mut buf = self.shards[shard].pop().unwrap_or_default();
        buf.reserve(capacity);

        PooledBuf {
            buf,
            home: Some((Arc::clone(self), shard)),
        }
    }

    /// Number of idle buffers in `shard`.
    pub fn idle(&self, shard: usize) -> usize {
        self.shards[shard % self.shards.len()].len()
    }

    fn give_back(&self, shard: usize, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }

        buf.clear();
        // a full shard just lets the buffer go
        let _ = self.shards[shard].push(buf);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("shards", &self.shards.len())
            .finish()
    }
}

/// A leased buffer, returned to its shard when dropped.
pub struct PooledBuf {
    buf: Vec<u8>,
    home: Option<(Arc<BufferPool>, usize)>,
}

impl PooledBuf {
    /// A buffer that belongs to no pool and is simply freed on drop.
    pub fn detached(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            home: None,
        }
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    #[inline(always)]
    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some((pool, shard)) = self.home.take() {
            pool.give_back(shard, std::mem::take(&mut self.buf));
        }
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}
