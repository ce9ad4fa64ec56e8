//! Block transport: staging of large results as addressable chunks.

pub mod store;

pub use store::{Chunk, ChunkLease, ChunkSet, ChunkStore, StagedBlocks};
