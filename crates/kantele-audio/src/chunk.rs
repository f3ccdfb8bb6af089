use std::time::Duration;

/// Payload bytes carried by one chunk.
pub const CHUNK_CAPACITY: usize = 4096;

/// A fixed-size unit of decoded audio payload.
///
/// Chunks are always handled as `Box<Chunk>`: ownership moves from the
/// [`ChunkPool`](crate::pool::ChunkPool) to the decode thread, through the
/// [`ChunkQueue`](crate::queue::ChunkQueue) to the playback thread, and back
/// into the pool.
pub struct Chunk {
    /// Link to the successor while the chunk sits in a queue. Owned by
    /// whichever link slot currently precedes this chunk.
    pub(crate) next: Option<Box<Chunk>>,
    len: usize,
    bit_rate: u32,
    elapsed: Option<Duration>,
    data: [u8; CHUNK_CAPACITY],
}

impl Chunk {
    pub(crate) fn new_boxed() -> Box<Chunk> {
        Box::new(Chunk {
            next: None,
            len: 0,
            bit_rate: 0,
            elapsed: None,
            data: [0; CHUNK_CAPACITY],
        })
    }

    /// Appends as much of `src` as fits and returns how many bytes were
    /// taken. A short return means the chunk is full and the rest belongs in
    /// the next chunk.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(CHUNK_CAPACITY - self.len);
        self.data[self.len..self.len + n].copy_from_slice(&src[..n]);
        self.len += n;
        n
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn remaining(&self) -> usize {
        CHUNK_CAPACITY - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == CHUNK_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    pub fn set_bit_rate(&mut self, bit_rate: u32) {
        self.bit_rate = bit_rate;
    }

    /// Stream position of the first sample in this chunk, if known.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    pub(crate) fn reset(&mut self) {
        debug_assert!(self.next.is_none(), "recycling a chunk that is still linked");
        self.len = 0;
        self.bit_rate = 0;
        self.elapsed = None;
    }
}
