
use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::database::SearchResult;
use crate::documents::markers::PageRef;

const BOOK_SUFFIX_LEN: usize = 8;

/// One deduplicated, citable source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationGroup {
    /// 1-based number used as `[n]` in prompts and answers
    pub citation_index: usize,
    /// Display name of the book
    pub book: String,
    pub page: PageRef,
    pub text: String,
    pub score: f32,
}

impl CitationGroup {
    /// "Book, page P", or just "Book" when the page is unknown
    #[inline]
    pub fn label(&self) -> String {
        if self.page.is_known() {
            format!("{}, page {}", self.book, self.page)
        } else {
            self.book.clone()
        }
    }
}

/// Citations plus the prompt context built from them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalContext {
    pub citations: Vec<CitationGroup>,
    pub context: String,
}

impl RetrievalContext {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// One `[n] Book, page P` line per citation
    #[inline]
    pub fn citation_list(&self) -> String {
        self.citations
            .iter()
            .map(|citation| format!("[{}] {}", citation.citation_index, citation.label()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Group ranked hits into citations, one per distinct book and page.
///
/// Hits at or below `threshold` are skipped. Citation numbers follow the
/// first appearance of each `(book, page)` in rank order; later hits on the
/// same page are dropped.
#[inline]
pub fn aggregate_citations(hits: &[SearchResult], threshold: f32) -> RetrievalContext {
    let mut seen: HashSet<(String, PageRef)> = HashSet::new();
    let mut citations: Vec<CitationGroup> = Vec::new();

    for hit in hits {
        if hit.score <= threshold {
            continue;
        }

        let book = normalize_book_name(&hit.record.book);
        if !seen.insert((book.clone(), hit.record.page)) {
            continue;
        }

        citations.push(CitationGroup {
            citation_index: citations.len() + 1,
            book,
            page: hit.record.page,
            text: hit.record.text.clone(),
            score: hit.score,
        });
    }

    let context = citations
        .iter()
        .map(|citation| {
            format!(
                "[{}] {}:\n{}",
                citation.citation_index,
                citation.label(),
                citation.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    debug!(
        "Aggregated {} hits into {} citations",
        hits.len(),
        citations.len()
    );

    RetrievalContext { citations, context }
}

/// Display name for a book id: drops the `_xxxxxxxx` import suffix and
/// turns underscores into spaces
#[inline]
pub fn normalize_book_name(book: &str) -> String {
    let stem = match book.rsplit_once('_') {
        Some((stem, suffix))
            if !stem.is_empty()
                && suffix.len() == BOOK_SUFFIX_LEN
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) =>
        {
            stem
        }
        _ => book,
    };

    stem.replace('_', " ")
}
