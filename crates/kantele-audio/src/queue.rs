use std::ptr::NonNull;
use std::sync::Mutex;

use tracing::trace;

use crate::chunk::Chunk;
use crate::pool::ChunkPool;

/// FIFO hand-off queue moving chunks from the decode thread to the playback
/// thread.
///
/// The queue links chunks through their intrusive `next` field, so pushing
/// and shifting move ownership of the boxed chunk without touching the
/// payload. It is specialized for exactly one producer and one consumer;
/// nothing here blocks waiting for data — [`ChunkQueue::shift`] returning
/// `None` means "nothing available right now", and any wait-until-available
/// signaling belongs to a layer above.
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    /// First chunk in the chain, owner of everything behind it.
    head: Option<Box<Chunk>>,
    /// The last chunk in the chain, i.e. the node whose `next` link is the
    /// slot the next push writes. `None` exactly when the queue is empty
    /// (the head slot itself is the tail slot then).
    tail: Option<NonNull<Chunk>>,
    len: usize,
}

// Safety: `tail` aliases the last node of the chain owned by `head` and is
// only ever dereferenced by `push` while the queue mutex is held, so moving
// `QueueInner` between threads (inside the mutex) is sound.
unsafe impl Send for QueueInner {}

impl ChunkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                head: None,
                tail: None,
                len: 0,
            }),
        }
    }

    /// Appends `chunk` at the tail. O(1).
    pub fn push(&self, mut chunk: Box<Chunk>) {
        chunk.next = None;
        let mut queue = self.lock_inner();
        let ptr = NonNull::from(&mut *chunk);
        match queue.tail {
            // Safety: `tail` points at the last node of the `head` chain;
            // the node is alive and nothing else references it while the
            // lock is held.
            Some(mut tail) => unsafe { tail.as_mut() }.next = Some(chunk),
            None => {
                debug_assert!(queue.head.is_none());
                debug_assert_eq!(queue.len, 0);
                queue.head = Some(chunk);
            }
        }
        queue.tail = Some(ptr);
        queue.len += 1;
    }

    /// Detaches and returns the head chunk, or `None` when the queue is
    /// empty. Never blocks. O(1).
    pub fn shift(&self) -> Option<Box<Chunk>> {
        let mut queue = self.lock_inner();
        let mut chunk = queue.head.take()?;
        queue.head = chunk.next.take();
        queue.len -= 1;
        if queue.head.is_none() {
            debug_assert_eq!(queue.len, 0);
            debug_assert_eq!(
                queue.tail.map(NonNull::as_ptr),
                Some(&mut *chunk as *mut Chunk)
            );
            queue.tail = None;
        } else {
            debug_assert!(queue.len > 0);
        }
        Some(chunk)
    }

    /// Inspects the head chunk without removing it.
    ///
    /// The view is taken under the queue mutex and cannot outlive it; the
    /// chunk may be shifted by the consumer the moment the closure returns.
    pub fn peek<R>(&self, f: impl FnOnce(Option<&Chunk>) -> R) -> R {
        let queue = self.lock_inner();
        f(queue.head.as_deref())
    }

    /// Drains the queue, handing every chunk back to `pool` exactly once.
    pub fn clear(&self, pool: &ChunkPool) {
        let mut drained = 0usize;
        while let Some(chunk) = self.shift() {
            pool.recycle(chunk);
            drained += 1;
        }
        if drained > 0 {
            trace!(drained, "cleared chunk queue");
        }
    }

    /// Number of queued chunks. A hint only when read from the other
    /// thread: it can be stale the moment this returns.
    pub fn len(&self) -> usize {
        self.lock_inner().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("chunk queue mutex poisoned")
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.len, 0,
            "chunk queue dropped while still holding chunks"
        );
        // Unlink iteratively; dropping the head chain recursively could
        // overflow the stack on a long queue.
        let mut next = self.head.take();
        while let Some(mut chunk) = next {
            next = chunk.next.take();
        }
    }
}
