#[cfg(test)]
mod tests;

use anyhow::Context;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{FlatIndex, MetadataRecord};
use crate::config::Config;
use crate::documents::DocumentSource;
use crate::embeddings::{Chunk, Embedder, normalize};
use crate::{RagError, Result};

const DEFAULT_OVERFETCH_FACTOR: usize = 2;
const MIN_OVERFETCH_FACTOR: usize = 2;

/// Vector index plus metadata list, kept aligned position by position.
///
/// Writers (`add`, `remove`, `reindex`) hold the write lock for the whole
/// embed, rebuild and persist sequence. Searches embed the query without the
/// lock and only take the read lock for the index scan.
pub struct VectorStore {
    state: RwLock<StoreState>,
    embedder: Arc<dyn Embedder>,
    index_path: PathBuf,
    metadata_path: PathBuf,
    overfetch_factor: usize,
}

/// A ranked hit from [`VectorStore::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub record: MetadataRecord,
    /// Cosine similarity with the query, higher is closer
    pub score: f32,
}

/// Outcome of [`VectorStore::reindex`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReindexSummary {
    /// Chunks in the rebuilt store
    pub chunks: usize,
    /// Books that contributed at least one chunk
    pub books: usize,
    /// Books that failed to load or embed, in source order
    pub skipped: Vec<String>,
}

/// A book present in the store and how many chunks it contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub book: String,
    pub chunks: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    index: FlatIndex,
    metadata: Vec<MetadataRecord>,
}

impl StoreState {
    /// Append records with their vectors. On error nothing is changed.
    fn append(&mut self, records: Vec<MetadataRecord>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if records.len() != vectors.len() {
            return Err(RagError::Database(format!(
                "Got {} vectors for {} records",
                vectors.len(),
                records.len()
            )));
        }

        let base = self.metadata.len();
        self.index.add(vectors)?;
        self.metadata
            .extend(records.into_iter().enumerate().map(|(offset, record)| {
                MetadataRecord {
                    global_index: base + offset,
                    ..record
                }
            }));
        Ok(())
    }

    fn is_consistent(&self) -> bool {
        self.index.len() == self.metadata.len()
            && self
                .metadata
                .iter()
                .enumerate()
                .all(|(position, record)| record.global_index == position)
    }
}

/// On-disk wrapper tying `index.json` and `metadata.json` to the same write
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<T> {
    snapshot: Uuid,
    payload: T,
}

impl VectorStore {
    /// Open a store persisted at the given paths.
    ///
    /// Missing, unreadable or mismatched files leave the store empty; the
    /// next successful mutation overwrites them.
    #[inline]
    pub fn open(
        index_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let index_path = index_path.into();
        let metadata_path = metadata_path.into();
        let state = load_state(&index_path, &metadata_path);

        info!(
            "Vector store opened with {} chunks from {}",
            state.metadata.len(),
            index_path.display()
        );

        Self {
            state: RwLock::new(state),
            embedder,
            index_path,
            metadata_path,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    /// Open the store under the configured data directory
    #[inline]
    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::open(config.index_path(), config.metadata_path(), embedder)
            .with_overfetch_factor(config.retrieval.overfetch_factor)
    }

    #[inline]
    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(MIN_OVERFETCH_FACTOR);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.read_state().metadata.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_state().metadata.is_empty()
    }

    /// Dimension of the stored vectors, once any have been added
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.read_state().index.dimension()
    }

    /// Embed and append `chunks` for `book`, returning how many were stored.
    ///
    /// An embedding failure leaves the store unchanged.
    #[inline]
    pub fn add(&self, book: &str, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            debug!("No chunks to add for {}", book);
            return Ok(0);
        }

        let mut state = self.write_state();

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embed_all(&texts)?;

        let created_at = Utc::now();
        let records = chunks
            .iter()
            .map(|chunk| MetadataRecord::from_chunk(book, chunk, 0, created_at))
            .collect();
        state.append(records, vectors)?;

        info!(
            "Added {} chunks for {} ({} total)",
            chunks.len(),
            book,
            state.metadata.len()
        );

        self.persist(&state)?;
        Ok(chunks.len())
    }

    /// Return up to `top_k` chunks scoring strictly above `threshold`, best first.
    ///
    /// Never fails: an empty query, an empty store or an embedding error all
    /// produce no results.
    #[inline]
    pub fn search(&self, query: &str, top_k: usize, threshold: f32) -> Vec<SearchResult> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let mut query_vector = match self.embedder.embed(query) {
            Ok(Some(vector)) => vector,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to embed search query: {}", e);
                return Vec::new();
            }
        };
        normalize(&mut query_vector);

        let state = self.read_state();
        if state.metadata.is_empty() {
            return Vec::new();
        }
        if state.index.dimension() != Some(query_vector.len()) {
            warn!(
                "Query embedding has dimension {}, index has {:?}",
                query_vector.len(),
                state.index.dimension()
            );
            return Vec::new();
        }

        let candidates = top_k
            .saturating_mul(self.overfetch_factor)
            .min(state.index.len());

        let mut results: Vec<SearchResult> = state
            .index
            .search(&query_vector, candidates)
            .into_iter()
            .filter(|(_, score)| *score > threshold)
            .filter_map(|(position, score)| {
                state.metadata.get(position).map(|record| SearchResult {
                    record: record.clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        debug!(
            "Search returned {} of {} candidates above {}",
            results.len(),
            candidates,
            threshold
        );
        results
    }

    /// Drop every chunk of `book`, returning how many were removed.
    ///
    /// Survivors are re-embedded into a fresh index. If that fails the store
    /// is left as it was.
    #[inline]
    pub fn remove(&self, book: &str) -> Result<usize> {
        let mut state = self.write_state();

        let removed = state
            .metadata
            .iter()
            .filter(|record| record.book == book)
            .count();
        if removed == 0 {
            debug!("No chunks stored for {}", book);
            return Ok(0);
        }

        let survivors: Vec<MetadataRecord> = state
            .metadata
            .iter()
            .filter(|record| record.book != book)
            .cloned()
            .collect();
        let texts: Vec<String> = survivors.iter().map(|record| record.text.clone()).collect();
        let vectors = self.embed_all(&texts)?;

        let mut rebuilt = StoreState::default();
        rebuilt.append(survivors, vectors)?;
        *state = rebuilt;

        info!(
            "Removed {} chunks for {} ({} remaining)",
            removed,
            book,
            state.metadata.len()
        );

        self.persist(&state)?;
        Ok(removed)
    }

    /// Rebuild the whole store from `source`.
    ///
    /// Books that fail to load or embed are skipped with a warning and listed
    /// in the summary. If every failing book leaves the rebuilt store empty,
    /// the last error is returned and the current contents are kept.
    #[inline]
    pub fn reindex(&self, source: &dyn DocumentSource) -> Result<ReindexSummary> {
        let mut state = self.write_state();

        let books = source.list_books()?;
        info!("Reindexing {} books", books.len());

        let created_at = Utc::now();
        let mut rebuilt = StoreState::default();
        let mut summary = ReindexSummary::default();
        let mut last_error = None;

        for book in &books {
            match self.embed_book(source, book, created_at) {
                Ok(Some((records, vectors))) => {
                    let count = records.len();
                    if let Err(e) = rebuilt.append(records, vectors) {
                        warn!("Skipping {} during reindex: {}", book, e);
                        summary.skipped.push(book.clone());
                        last_error = Some(e);
                        continue;
                    }
                    summary.books += 1;
                    debug!("Reindexed {} ({} chunks)", book, count);
                }
                Ok(None) => debug!("{} produced no chunks", book),
                Err(e) => {
                    warn!("Skipping {} during reindex: {}", book, e);
                    summary.skipped.push(book.clone());
                    last_error = Some(e);
                }
            }
        }

        if rebuilt.metadata.is_empty() {
            if let Some(e) = last_error {
                error!(
                    "Reindex produced nothing, {} books failed; keeping {} existing chunks",
                    summary.skipped.len(),
                    state.metadata.len()
                );
                return Err(e);
            }
        }

        *state = rebuilt;
        summary.chunks = state.metadata.len();
        info!(
            "Reindex complete: {} chunks from {} books, {} skipped",
            summary.chunks,
            summary.books,
            summary.skipped.len()
        );

        self.persist(&state)?;
        Ok(summary)
    }

    /// Distinct books in the store, in the order they were first added
    #[inline]
    pub fn books(&self) -> Vec<BookSummary> {
        let state = self.read_state();
        let counts = state
            .metadata
            .iter()
            .map(|record| record.book.as_str())
            .counts();

        state
            .metadata
            .iter()
            .map(|record| record.book.as_str())
            .unique()
            .map(|book| BookSummary {
                book: book.to_string(),
                chunks: counts.get(book).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Records of `book` in store order
    #[inline]
    pub fn records_for_book(&self, book: &str) -> Vec<MetadataRecord> {
        self.read_state()
            .metadata
            .iter()
            .filter(|record| record.book == book)
            .cloned()
            .collect()
    }

    /// Chunk and embed one book for a rebuild; `None` when it has no content
    fn embed_book(
        &self,
        source: &dyn DocumentSource,
        book: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<(Vec<MetadataRecord>, Vec<Vec<f32>>)>> {
        let chunks = source.load_chunks(book)?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embed_all(&texts)?;
        let records = chunks
            .iter()
            .map(|chunk| MetadataRecord::from_chunk(book, chunk, 0, created_at))
            .collect();
        Ok(Some((records, vectors)))
    }

    fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        for vector in &mut vectors {
            normalize(vector);
        }
        Ok(vectors)
    }

    /// Write both files under one snapshot id. Both temporary files are
    /// complete before either target is replaced.
    fn persist(&self, state: &StoreState) -> Result<()> {
        let snapshot = Uuid::new_v4();

        let written = write_temp(
            &self.index_path,
            &Snapshot {
                snapshot,
                payload: &state.index,
            },
        )
        .and_then(|index_temp| {
            let metadata_temp = write_temp(
                &self.metadata_path,
                &Snapshot {
                    snapshot,
                    payload: &state.metadata,
                },
            )?;
            Ok((index_temp, metadata_temp))
        })
        .and_then(|(index_temp, metadata_temp)| {
            replace(&index_temp, &self.index_path)?;
            replace(&metadata_temp, &self.metadata_path)
        });

        written.map_err(|e| {
            error!("Failed to persist vector store: {:#}", e);
            RagError::Database(format!("Failed to persist vector store: {:#}", e))
        })?;

        debug!("Persisted snapshot {}", snapshot);
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_state(index_path: &Path, metadata_path: &Path) -> StoreState {
    if !index_path.exists() && !metadata_path.exists() {
        debug!("No persisted vector store at {}", index_path.display());
        return StoreState::default();
    }

    match read_state_files(index_path, metadata_path) {
        Ok(state) => state,
        Err(e) => {
            warn!("Starting with an empty vector store: {:#}", e);
            StoreState::default()
        }
    }
}

fn read_state_files(index_path: &Path, metadata_path: &Path) -> anyhow::Result<StoreState> {
    let index: Snapshot<FlatIndex> = read_json(index_path)?;
    let metadata: Snapshot<Vec<MetadataRecord>> = read_json(metadata_path)?;

    anyhow::ensure!(
        index.snapshot == metadata.snapshot,
        "index snapshot {} does not match metadata snapshot {}",
        index.snapshot,
        metadata.snapshot
    );
    index.payload.validate()?;

    let state = StoreState {
        index: index.payload,
        metadata: metadata.payload,
    };
    anyhow::ensure!(
        state.is_consistent(),
        "index holds {} vectors but metadata holds {} aligned records",
        state.index.len(),
        state.metadata.len()
    );

    Ok(state)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Serialize `value` next to `path`, returning the temporary file
fn write_temp<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let temp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec(value).context("Failed to serialize store")?;
    fs::write(&temp_path, json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    Ok(temp_path)
}

fn replace(temp_path: &Path, path: &Path) -> anyhow::Result<()> {
    fs::rename(temp_path, path).with_context(|| format!("Failed to replace {}", path.display()))
}
