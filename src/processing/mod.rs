//! Text processing utilities for the indexing pipeline.

mod chunking;

pub use chunking::{Chunker, ChunkingError, TextChunk};
