// Retrieval module
// Turns similarity hits into page-cited sources and grounded answers

pub mod answer;
pub mod chapters;
pub mod citations;


pub use answer::{
    Answer, AnswerGenerator, CitationReference, build_prompt, extract_citation_references,
};
pub use chapters::{Chapter, identify_chapters};
pub use citations::{CitationGroup, RetrievalContext, aggregate_citations, normalize_book_name};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::VectorStore;

/// Ranking and filtering knobs for retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum number of hits requested from the store
    pub top_k: usize,
    /// Minimum similarity for a hit to leave the store
    pub store_threshold: f32,
    /// Minimum similarity for a hit to become a citation
    pub citation_threshold: f32,
    /// Candidates scanned per requested hit before filtering
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            store_threshold: 0.4,
            citation_threshold: 0.4,
            overfetch_factor: 2,
        }
    }
}

/// Query side of the pipeline: search, cite, answer
pub struct Retriever {
    store: Arc<VectorStore>,
    config: RetrievalConfig,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked, deduplicated sources for `query`
    #[inline]
    pub fn retrieve(&self, query: &str) -> RetrievalContext {
        let hits = self
            .store
            .search(query, self.config.top_k, self.config.store_threshold);
        aggregate_citations(&hits, self.config.citation_threshold)
    }

    /// Answer `question` from retrieved sources.
    ///
    /// The generator is not called when nothing relevant was found, and a
    /// generator failure degrades to the same fallback answer.
    #[inline]
    pub fn answer(&self, question: &str, generator: &dyn AnswerGenerator) -> Answer {
        let retrieved = self.retrieve(question);
        if retrieved.is_empty() {
            debug!("No sources above threshold for question");
            return Answer::no_information();
        }

        let prompt = build_prompt(question, &retrieved);
        match generator.generate(&prompt) {
            Ok(text) => {
                let references = extract_citation_references(&text, &retrieved.citations);
                debug!(
                    "Answer cites {} of {} sources",
                    references.len(),
                    retrieved.citations.len()
                );
                Answer {
                    text,
                    citations: retrieved.citations,
                    references,
                }
            }
            Err(e) => {
                warn!("Answer generation failed: {}", e);
                Answer::no_information()
            }
        }
    }
}
