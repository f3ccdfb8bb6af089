use std::sync::Mutex;

use tracing::trace;

use crate::chunk::Chunk;

/// Fixed-capacity chunk allocator shared by the decode and playback threads.
///
/// Every chunk is allocated up front; `allocate` returning `None` is the
/// normal backpressure signal when all chunks are in flight, not an error.
pub struct ChunkPool {
    free: Mutex<Vec<Box<Chunk>>>,
    capacity: usize,
}

impl ChunkPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "chunk pool needs at least one chunk");
        let free = (0..capacity).map(|_| Chunk::new_boxed()).collect();
        Self {
            free: Mutex::new(free),
            capacity,
        }
    }

    /// Takes a chunk out of the pool, or `None` when every chunk is in use.
    pub fn allocate(&self) -> Option<Box<Chunk>> {
        let chunk = self.lock_free().pop();
        if chunk.is_none() {
            trace!(capacity = self.capacity, "chunk pool exhausted");
        }
        chunk
    }

    /// Hands a chunk back. The chunk is reset before it becomes available
    /// again.
    pub fn recycle(&self, mut chunk: Box<Chunk>) {
        chunk.reset();
        let mut free = self.lock_free();
        debug_assert!(
            free.len() < self.capacity,
            "more chunks returned than the pool ever handed out"
        );
        free.push(chunk);
    }

    /// Chunks currently sitting in the pool. A hint only: the other thread
    /// may allocate or recycle right after this returns.
    pub fn available(&self) -> usize {
        self.lock_free().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Box<Chunk>>> {
        self.free.lock().expect("chunk pool mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkPool;

    #[test]
    fn allocate_until_exhausted_then_recycle() {
        let pool = ChunkPool::new(2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 2);

        let a = pool.allocate().expect("first chunk");
        let b = pool.allocate().expect("second chunk");
        assert_eq!(pool.available(), 0);
        assert!(pool.allocate().is_none());

        pool.recycle(a);
        assert_eq!(pool.available(), 1);
        pool.recycle(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn recycled_chunks_come_back_reset() {
        let pool = ChunkPool::new(1);
        let mut chunk = pool.allocate().expect("chunk");
        chunk.write(b"stale payload");
        chunk.set_bit_rate(128);
        pool.recycle(chunk);

        let chunk = pool.allocate().expect("chunk again");
        assert!(chunk.is_empty());
        assert_eq!(chunk.bit_rate(), 0);
    }
}
