//! Reusable byte buffers for request value payloads.
//!
//! Store operations serialize their value into a buffer drawn from the
//! pool; the buffer travels inside the request and comes back once the
//! encoder has copied it onto the wire. The pool tracks the largest
//! payload it has seen and sizes fresh buffers from that high-water mark,
//! so a workload of uniform values stops re-growing every buffer from
//! scratch. Recycling is bounded two ways: a buffer whose capacity grew
//! past the recycle cap is dropped instead of kept resident, and the free
//! list as a whole never holds more than a fixed budget of capacity bytes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Smallest capacity handed out for a fresh buffer.
const MIN_BUFFER_CAPACITY: usize = 256;

/// Default cap on the capacity a buffer may keep and still be recycled.
const DEFAULT_RECYCLE_CAP: usize = 64 * 1024;

/// Default budget of capacity bytes the free list may retain.
const DEFAULT_RETAINED_BUDGET: usize = 256 * 1024;

struct FreeList {
    buffers: Vec<Vec<u8>>,
    bytes: usize,
}

struct PoolInner {
    free: Mutex<FreeList>,
    /// Largest payload length released so far; sizes fresh allocations.
    high_water: AtomicUsize,
    recycle_cap: usize,
    retained_budget: usize,
}

impl PoolInner {
    fn allocation_hint(&self) -> usize {
        self.high_water
            .load(Ordering::Relaxed)
            .clamp(MIN_BUFFER_CAPACITY, self.recycle_cap)
    }

    fn release(&self, mut buffer: Vec<u8>) {
        self.high_water.fetch_max(buffer.len(), Ordering::Relaxed);

        // A buffer that ballooned past the recycle cap is cheaper to
        // reallocate later than to keep resident.
        let capacity = buffer.capacity();
        if capacity == 0 || capacity > self.recycle_cap {
            return;
        }

        buffer.clear();
        let mut free = self.free.lock();
        if free.bytes + capacity <= self.retained_budget {
            free.bytes += capacity;
            free.buffers.push(buffer);
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Dropping the buffer offers its allocation back to the pool; [`take`]
/// detaches it instead. Standalone buffers (from [`PooledBuffer::new`] or
/// [`PooledBuffer::from_slice`]) have no pool and simply free on drop.
///
/// [`take`]: PooledBuffer::take
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// Create a standalone buffer with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Some(Vec::with_capacity(capacity)),
            pool: None,
        }
    }

    /// Create a standalone buffer holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buffer: Some(data.to_vec()),
            pool: None,
        }
    }

    /// Get read access to the buffered bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_deref().expect("buffer present until drop")
    }

    /// Get mutable access to the inner vector.
    #[must_use]
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buffer.as_mut().expect("buffer present until drop")
    }

    /// Detach the inner vector; it will not return to the pool.
    #[must_use]
    pub fn take(mut self) -> Vec<u8> {
        self.pool = None;
        self.buffer.take().expect("buffer present until drop")
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_vec()
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.as_slice().len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl From<Vec<u8>> for PooledBuffer {
    fn from(buffer: Vec<u8>) -> Self {
        Self {
            buffer: Some(buffer),
            pool: None,
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(pool), Some(buffer)) = (self.pool.take(), self.buffer.take()) {
            pool.release(buffer);
        }
    }
}

/// Pool-wide allocator hint for per-request value buffers.
///
/// Buffers are never shared across requests; each request draws its own
/// and offers it back after encoding. The pool adapts to the workload:
/// released payload lengths raise the sizing hint for fresh allocations,
/// while the recycle cap and retained-bytes budget keep a burst of large
/// values from pinning memory.
///
/// ## Example
///
/// ```rust
/// use stratus_core::BufferPool;
///
/// let pool = BufferPool::new();
///
/// let mut buffer = pool.acquire();
/// buffer.extend_from_slice(b"hello");
/// drop(buffer); // allocation offered back to the pool
///
/// assert_eq!(pool.free_buffers(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool with the default recycle cap and retention budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RECYCLE_CAP, DEFAULT_RETAINED_BUDGET)
    }

    /// Create a pool with explicit limits.
    ///
    /// # Arguments
    /// * `recycle_cap` - largest capacity a returned buffer may keep
    /// * `retained_budget` - total capacity bytes the free list may hold
    #[must_use]
    pub fn with_limits(recycle_cap: usize, retained_budget: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(FreeList {
                    buffers: Vec::new(),
                    bytes: 0,
                }),
                high_water: AtomicUsize::new(0),
                recycle_cap: recycle_cap.max(MIN_BUFFER_CAPACITY),
                retained_budget,
            }),
        }
    }

    /// Acquire a buffer, recycling a free one when available.
    ///
    /// Fresh buffers are sized from the pool's payload high-water mark,
    /// so capacity converges on the workload's value size.
    #[must_use]
    pub fn acquire(&self) -> PooledBuffer {
        let recycled = {
            let mut free = self.inner.free.lock();
            match free.buffers.pop() {
                Some(buffer) => {
                    free.bytes -= buffer.capacity();
                    Some(buffer)
                }
                None => None,
            }
        };
        let buffer =
            recycled.unwrap_or_else(|| Vec::with_capacity(self.inner.allocation_hint()));
        PooledBuffer {
            buffer: Some(buffer),
            pool: Some(Arc::clone(&self.inner)),
        }
    }

    /// Number of buffers currently on the free list.
    #[must_use]
    pub fn free_buffers(&self) -> usize {
        self.inner.free.lock().buffers.len()
    }

    /// Capacity bytes currently held by the free list.
    #[must_use]
    pub fn retained_bytes(&self) -> usize {
        self.inner.free.lock().bytes
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_pool_hands_out_minimum_capacity() {
        let pool = BufferPool::new();
        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= MIN_BUFFER_CAPACITY);
        assert_eq!(pool.free_buffers(), 0);
    }

    #[test]
    fn test_released_allocation_is_reused() {
        let pool = BufferPool::new();

        let mut buffer = pool.acquire();
        buffer.extend_from_slice(&[7u8; 512]);
        let address = buffer.as_ptr() as usize;
        drop(buffer);

        assert_eq!(pool.free_buffers(), 1);
        assert!(pool.retained_bytes() >= 512);

        let buffer = pool.acquire();
        assert_eq!(buffer.as_ptr() as usize, address);
        assert!(buffer.is_empty());
        assert_eq!(pool.free_buffers(), 0);
        assert_eq!(pool.retained_bytes(), 0);
    }

    #[test]
    fn test_payload_sizes_raise_the_allocation_hint() {
        let pool = BufferPool::new();

        let mut buffer = pool.acquire();
        buffer.extend_from_slice(&vec![0u8; 4096]);
        drop(buffer);

        // One acquire drains the free list; the next allocates fresh and
        // must already be sized for the observed payloads.
        let recycled = pool.acquire();
        let fresh = pool.acquire();
        assert!(recycled.capacity() >= 4096);
        assert!(fresh.capacity() >= 4096);
    }

    #[test]
    fn test_retention_budget_bounds_free_list_bytes() {
        let pool = BufferPool::with_limits(64 * 1024, 8 * 1024);

        let held: Vec<_> = (0..4)
            .map(|_| {
                let mut buffer = pool.acquire();
                buffer.extend_from_slice(&vec![0u8; 4 * 1024]);
                buffer
            })
            .collect();
        drop(held);

        // Four 4 KiB buffers came back, but only the budget's worth stay.
        assert!(pool.retained_bytes() <= 8 * 1024);
        assert!(pool.free_buffers() < 4);
        assert!(pool.free_buffers() >= 1);
    }

    #[test]
    fn test_oversized_buffers_are_not_recycled() {
        let pool = BufferPool::with_limits(1024, 64 * 1024);

        let mut buffer = pool.acquire();
        buffer.extend_from_slice(&vec![0u8; 4 * 1024]);
        drop(buffer);

        assert_eq!(pool.free_buffers(), 0);
        assert_eq!(pool.retained_bytes(), 0);
    }

    #[test]
    fn test_take_detaches_from_pool() {
        let pool = BufferPool::new();

        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"payload");
        let owned = buffer.take();

        assert_eq!(owned, b"payload");
        assert_eq!(pool.free_buffers(), 0);
    }

    #[test]
    fn test_standalone_buffers_skip_the_pool() {
        let mut buffer = PooledBuffer::new(64);
        buffer.extend_from_slice(b"standalone");
        assert_eq!(buffer.as_slice(), b"standalone");

        let buffer = PooledBuffer::from_slice(b"copy");
        assert_eq!(&buffer[..], b"copy");
    }
}
