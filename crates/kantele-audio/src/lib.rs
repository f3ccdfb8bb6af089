//! Audio chunk buffering for the decode → playback hand-off.
//!
//! A decode thread fills [`Chunk`]s borrowed from a shared [`ChunkPool`] and
//! pushes them into a [`ChunkQueue`]; the playback thread shifts them back
//! out and eventually recycles them into the pool. Chunk ownership moves
//! through the whole path — payload bytes are written once and never copied.

pub mod chunk;
pub mod pool;
pub mod queue;

pub use chunk::{Chunk, CHUNK_CAPACITY};
pub use pool::ChunkPool;
pub use queue::ChunkQueue;
