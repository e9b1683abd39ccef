// Chunking of note text and the embedding service client

pub mod chunking;
pub mod client;

pub use chunking::{Chunker, DEFAULT_MAX_CHUNK_SIZE, clean_markup, split};
pub use client::{Embedder, EmbeddingClient, cosine_similarity};
