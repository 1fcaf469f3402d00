
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::VectorStore;
use crate::documents::{DocumentLibrary, DocumentSource};
use crate::embeddings::{Embedder, OllamaClient};
use crate::retrieval::{AnswerGenerator, Retriever, identify_chapters, normalize_book_name};

const SNIPPET_CHARS: usize = 240;

/// Collaborators shared by every command, built once from configuration
pub struct Workspace {
    config: Config,
    library: DocumentLibrary,
    store: Arc<VectorStore>,
    ollama: Arc<OllamaClient>,
}

impl Workspace {
    #[inline]
    pub fn open(config: Config) -> Result<Self> {
        let ollama =
            Arc::new(OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?);
        let embedder: Arc<dyn Embedder> = Arc::clone(&ollama) as Arc<dyn Embedder>;

        Ok(Self::assemble(config, ollama, embedder))
    }

    fn assemble(config: Config, ollama: Arc<OllamaClient>, embedder: Arc<dyn Embedder>) -> Self {
        let library = DocumentLibrary::from_config(&config);
        let store = Arc::new(VectorStore::from_config(&config, embedder));

        Self {
            config,
            library,
            store,
            ollama,
        }
    }

    /// Open with the configuration from the default base directory
    #[inline]
    pub fn load() -> Result<Self> {
        Self::open(Config::load().context("Failed to load configuration")?)
    }

    /// Known book ids: files in the library plus anything only in the index
    fn known_books(&self) -> Result<Vec<String>> {
        let mut books = self
            .library
            .list_books()
            .context("Failed to list library")?;
        for summary in self.store.books() {
            if !books.contains(&summary.book) {
                books.push(summary.book);
            }
        }
        Ok(books)
    }
}

/// Import a file into the library and index it
#[inline]
pub fn add_book(workspace: &Workspace, path: &Path) -> Result<String> {
    info!("Adding book from {}", path.display());

    let book = workspace
        .library
        .import_file(path)
        .with_context(|| format!("Failed to import {}", path.display()))?;

    let chunks = match workspace.library.load_chunks(&book) {
        Ok(chunks) if !chunks.is_empty() => chunks,
        Ok(_) => {
            discard_import(workspace, &book);
            anyhow::bail!("{} has no text left once page markers are removed", path.display());
        }
        Err(e) => {
            error!("Chunking {} failed: {}", book, e);
            discard_import(workspace, &book);
            return Err(e).context("Failed to chunk imported book");
        }
    };

    let bar = spinner(format!("Embedding {} chunks", chunks.len()));
    let added = workspace.store.add(&book, &chunks);
    bar.finish_and_clear();

    match added {
        Ok(count) => {
            println!("📚 Added {} ({})", normalize_book_name(&book), book);
            println!("   Chunks indexed: {}", count);
            println!("   Total chunks: {}", workspace.store.len());
            Ok(book)
        }
        Err(e) => {
            error!("Indexing {} failed: {}", book, e);
            // A failed write still keeps the chunks in memory; their file stays
            if workspace.store.records_for_book(&book).is_empty() {
                discard_import(workspace, &book);
            }
            Err(e).with_context(|| format!("Failed to index {}", path.display()))
        }
    }
}

/// List books with their chunk counts
#[inline]
pub fn list_books(workspace: &Workspace) -> Result<()> {
    let books = workspace.known_books()?;

    if books.is_empty() {
        println!("No books have been added yet.");
        println!("Use 'book-rag add <file>' to add one.");
        return Ok(());
    }

    let summaries = workspace.store.books();
    println!("Books ({} total):", books.len());
    println!();

    for book in &books {
        let chunks = summaries
            .iter()
            .find(|summary| &summary.book == book)
            .map_or(0, |summary| summary.chunks);

        println!("📚 {}", normalize_book_name(book));
        println!("   ID: {}", book);
        if chunks == 0 {
            println!("   Chunks: none indexed (run 'book-rag reindex')");
        } else {
            println!("   Chunks: {}", chunks);
        }
    }

    Ok(())
}

/// Remove a book from the index and the library
#[inline]
pub fn remove_book(workspace: &Workspace, identifier: &str) -> Result<()> {
    let known = workspace.known_books()?;
    let book = resolve_book(identifier, &known)
        .ok_or_else(|| anyhow::anyhow!("Book not found: {}", identifier))?;

    println!("Found book: {} ({})", normalize_book_name(&book), book);

    let bar = spinner("Rebuilding index".to_string());
    let removed = workspace.store.remove(&book);
    bar.finish_and_clear();
    let removed = removed.with_context(|| format!("Failed to remove {} from the index", book))?;

    let deleted = workspace
        .library
        .delete_book(&book)
        .with_context(|| format!("Failed to delete {} from the library", book))?;

    println!("✓ Removed {} chunks from the index", removed);
    if deleted {
        println!("✓ Deleted book file");
    }
    println!("Total chunks: {}", workspace.store.len());

    Ok(())
}

/// Rebuild the whole index from the library
#[inline]
pub fn reindex(workspace: &Workspace) -> Result<()> {
    let bar = spinner("Reindexing library".to_string());
    let summary = workspace.store.reindex(&workspace.library);
    bar.finish_and_clear();

    let summary = summary.context("Reindex failed, the existing index was kept")?;
    println!(
        "Reindexing complete. Books: {}, total chunks: {}",
        summary.books, summary.chunks
    );
    if !summary.skipped.is_empty() {
        println!("⚠️  Skipped {} books:", summary.skipped.len());
        for book in &summary.skipped {
            println!("   {}", book);
        }
    }

    Ok(())
}

/// Print the passages most similar to `query`
#[inline]
pub fn search(
    workspace: &Workspace,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    let top_k = top_k.unwrap_or(workspace.config.retrieval.top_k);
    let threshold = threshold.unwrap_or(workspace.config.retrieval.store_threshold);

    let results = workspace.store.search(query, top_k, threshold);
    if results.is_empty() {
        println!("No passages scored above {}.", threshold);
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        let record = &result.record;
        println!(
            "{}. {} (page {}) score {:.3}",
            rank + 1,
            normalize_book_name(&record.book),
            record.page,
            result.score
        );
        println!("   {}", snippet(&record.text, SNIPPET_CHARS));
        println!();
    }

    Ok(())
}

/// List the chapter headings found in a book's indexed text
#[inline]
pub fn list_chapters(workspace: &Workspace, identifier: &str) -> Result<()> {
    let known = workspace.known_books()?;
    let book = resolve_book(identifier, &known)
        .ok_or_else(|| anyhow::anyhow!("Book not found: {}", identifier))?;
    let name = normalize_book_name(&book);

    let records = workspace.store.records_for_book(&book);
    if records.is_empty() {
        println!("{} has no indexed chunks. Run 'book-rag reindex' first.", name);
        return Ok(());
    }

    let chapters = identify_chapters(&records);
    if chapters.is_empty() {
        println!("No chapter headings found in {}.", name);
        return Ok(());
    }

    println!("Chapters in {} ({}):", name, chapters.len());
    println!();
    for chapter in &chapters {
        if chapter.page.is_known() {
            println!("  {} (page {})", chapter.title, chapter.page);
        } else {
            println!("  {}", chapter.title);
        }
    }

    Ok(())
}

/// Answer a question with cited sources
#[inline]
pub fn ask(workspace: &Workspace, question: &str) -> Result<()> {
    let retriever = Retriever::new(
        Arc::clone(&workspace.store),
        workspace.config.retrieval.clone(),
    );
    let generator: &dyn AnswerGenerator = workspace.ollama.as_ref();

    let bar = spinner("Thinking".to_string());
    let answer = retriever.answer(question, generator);
    bar.finish_and_clear();

    println!("{}", answer.text);

    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &answer.citations {
            let cited = answer
                .references
                .iter()
                .any(|reference| reference.citation_index == citation.citation_index);
            println!(
                "  [{}] {}{}",
                citation.citation_index,
                citation.label(),
                if cited { " *" } else { "" }
            );
        }
    }

    Ok(())
}

/// Show configuration, index contents and Ollama health
#[inline]
pub fn show_status(workspace: &Workspace) -> Result<()> {
    let config = &workspace.config;

    println!("📊 Book RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📁 Storage:");
    println!("   Base directory: {}", config.base_dir.display());
    println!("   Books: {}", config.books_dir().display());
    println!("   Index: {}", config.index_path().display());
    println!();

    println!("🔍 Index Status:");
    let books = workspace.known_books()?;
    println!("   Books: {}", books.len());
    println!("   Chunks: {}", workspace.store.len());
    match workspace.store.dimension() {
        Some(dimension) => {
            println!("   Dimension: {}", dimension);
            if dimension != config.ollama.embedding_dimension as usize {
                println!(
                    "   ⚠️  Configured dimension is {}; run 'book-rag reindex' after changing models",
                    config.ollama.embedding_dimension
                );
            }
        }
        None => println!("   Dimension: (empty index)"),
    }
    println!();

    println!("🤖 Ollama Status:");
    match workspace.ollama.health_check() {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding model: {}", config.ollama.model);
            println!("   💬 Generation model: {}", config.ollama.generation_model);
        }
        Err(e) => {
            println!("   ❌ Ollama: Unavailable - {:#}", e);
        }
    }

    Ok(())
}

/// Match `identifier` to a book id: exact id first, then a case-insensitive
/// match on the display name
fn resolve_book(identifier: &str, known: &[String]) -> Option<String> {
    if let Some(book) = known.iter().find(|book| book.as_str() == identifier) {
        return Some(book.clone());
    }

    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    known
        .iter()
        .find(|book| normalize_book_name(book).to_lowercase() == needle)
        .or_else(|| {
            known
                .iter()
                .find(|book| normalize_book_name(book).to_lowercase().contains(&needle))
        })
        .cloned()
}

fn discard_import(workspace: &Workspace, book: &str) {
    if let Err(e) = workspace.library.delete_book(book) {
        warn!("Failed to remove {} after a failed import: {}", book, e);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let truncated: String = flattened.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

fn spinner(message: String) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
