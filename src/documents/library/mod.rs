
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::DocumentSource;
use super::extractor::{PlainTextExtractor, TextExtractor};
use crate::config::Config;
use crate::embeddings::{Chunk, ChunkingConfig, chunk_document};
use crate::{RagError, Result};

const BOOK_EXTENSION: &str = "txt";
const SUFFIX_LEN: usize = 8;
const FALLBACK_STEM: &str = "book";

/// Directory of imported books, one marked-up text file per book.
///
/// A book's identifier is its file stem: the sanitized source file name
/// followed by an underscore and eight hex digits.
pub struct DocumentLibrary {
    books_dir: PathBuf,
    extractor: Arc<dyn TextExtractor>,
    chunking: ChunkingConfig,
}

impl DocumentLibrary {
    #[inline]
    pub fn new(
        books_dir: impl Into<PathBuf>,
        extractor: Arc<dyn TextExtractor>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            books_dir: books_dir.into(),
            extractor,
            chunking,
        }
    }

    /// Library in the configured books directory, reading plain text sources
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.books_dir(),
            Arc::new(PlainTextExtractor),
            config.chunking.clone(),
        )
    }

    #[inline]
    pub fn books_dir(&self) -> &Path {
        &self.books_dir
    }

    /// Extract `source` and store its text, returning the new book id
    #[inline]
    pub fn import_file(&self, source: &Path) -> Result<String> {
        let text = self.extractor.extract(source)?;
        if text.trim().is_empty() {
            return Err(RagError::Extraction(format!(
                "No text could be extracted from {}",
                source.display()
            )));
        }

        let stem = source
            .file_stem()
            .map(|stem| sanitize_stem(&stem.to_string_lossy()))
            .unwrap_or_else(|| FALLBACK_STEM.to_string());
        let book = format!("{}_{}", stem, unique_suffix());

        fs::create_dir_all(&self.books_dir)?;
        let path = self.book_path(&book)?;
        fs::write(&path, &text)?;

        info!(
            "Imported {} as {} ({} bytes)",
            source.display(),
            book,
            text.len()
        );
        Ok(book)
    }

    /// Stored marked-up text of `book`
    #[inline]
    pub fn read_book(&self, book: &str) -> Result<String> {
        let path = self.book_path(book)?;
        fs::read_to_string(&path).map_err(|e| {
            RagError::Extraction(format!("Failed to read book {}: {}", book, e))
        })
    }

    /// Delete the stored text of `book`. Returns false if it did not exist.
    #[inline]
    pub fn delete_book(&self, book: &str) -> Result<bool> {
        let path = self.book_path(book)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted book file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No book file for {}", book);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn book_path(&self, book: &str) -> Result<PathBuf> {
        if !is_valid_book_id(book) {
            return Err(RagError::Extraction(format!("Invalid book id: '{}'", book)));
        }
        Ok(self
            .books_dir
            .join(book)
            .with_extension(BOOK_EXTENSION))
    }
}

impl DocumentSource for DocumentLibrary {
    #[inline]
    fn list_books(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.books_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Books directory {} does not exist", self.books_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut books = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(BOOK_EXTENSION)
            {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) if is_valid_book_id(stem) => books.push(stem.to_string()),
                _ => warn!("Ignoring unexpected file {}", path.display()),
            }
        }

        books.sort();
        Ok(books)
    }

    #[inline]
    fn load_chunks(&self, book: &str) -> Result<Vec<Chunk>> {
        let text = self.read_book(book)?;
        let chunks = chunk_document(&text, book, &self.chunking);
        debug!("{} split into {} chunks", book, chunks.len());
        Ok(chunks)
    }
}

fn sanitize_stem(stem: &str) -> String {
    let replaced: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let collapsed = replaced
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if collapsed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        collapsed
    }
}

fn unique_suffix() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

fn is_valid_book_id(book: &str) -> bool {
    !book.is_empty()
        && book
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}
