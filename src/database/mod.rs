// Database module
// Flat vector index plus the positionally aligned metadata list describing it

#[cfg(test)]
mod tests;

pub mod index;
pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::markers::PageRef;
use crate::embeddings::chunking::Chunk;

pub use index::FlatIndex;
pub use vector_store::{BookSummary, ReindexSummary, SearchResult, VectorStore};

/// Metadata stored alongside the vector at the same index position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// The chunk text that was embedded
    pub text: String,
    /// Identifier of the source document
    pub book: String,
    /// Page on which the chunk starts
    pub page: PageRef,
    /// Position of this record (and its vector) in the store
    pub global_index: usize,
    /// Creation order of the chunk within its book
    pub ordinal: usize,
    /// Byte offsets of the chunk in the book's clean text
    pub start_offset: usize,
    pub end_offset: usize,
    /// When the chunk was first embedded
    pub created_at: DateTime<Utc>,
}

impl MetadataRecord {
    #[inline]
    pub fn from_chunk(
        book: &str,
        chunk: &Chunk,
        global_index: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: chunk.text.clone(),
            book: book.to_string(),
            page: chunk.page,
            global_index,
            ordinal: chunk.ordinal,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            created_at,
        }
    }
}
