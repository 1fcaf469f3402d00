// Embeddings module
// Page-aware chunking and the gateway to the embedding model

pub mod chunking;
pub mod ollama;


pub use chunking::{Chunk, ChunkingConfig, chunk_document, chunk_text};
pub use ollama::OllamaClient;

use crate::Result;

/// Text to vector gateway.
///
/// Implementations must be deterministic enough that re-embedding the same
/// text lands near its original vector; the store re-embeds surviving
/// chunks when a book is removed.
pub trait Embedder: Send + Sync {
    /// Embed a single text. Empty or whitespace-only input yields `None`.
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Embed many texts, one vector per input in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON && (norm - 1.0).abs() > 1e-6 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
