// Documents module
// Page marker extraction, text extraction and the on-disk book library

pub mod extractor;
pub mod library;
pub mod markers;

pub use extractor::{PlainTextExtractor, TextExtractor};
pub use library::DocumentLibrary;
pub use markers::{PageOffsetTable, PageRef, extract_page_markers};

use crate::Result;
use crate::embeddings::Chunk;

/// Where a full reindex reads books from
pub trait DocumentSource {
    /// Book identifiers in the order they should be indexed
    fn list_books(&self) -> Result<Vec<String>>;

    /// Chunks of one book, ready for embedding
    fn load_chunks(&self, book: &str) -> Result<Vec<Chunk>>;
}
