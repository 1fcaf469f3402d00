
use std::collections::HashSet;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::Serialize;

use super::citations::{CitationGroup, RetrievalContext};
use crate::Result;
use crate::documents::markers::PageRef;

/// Returned when nothing relevant was retrieved or generation failed
pub const NO_RELEVANT_INFORMATION: &str = "I could not find relevant information in the library \
     to answer this question. Try rephrasing it, or check that the material has been added.";

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:[ \t]*,[ \t]*\d+)*)\]").expect("citation marker pattern is valid")
});

/// Text generation collaborator used to phrase answers
pub trait AnswerGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// A generated answer with the sources it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Every source offered to the generator
    pub citations: Vec<CitationGroup>,
    /// Sources the answer actually cites, in first-citation order
    pub references: Vec<CitationReference>,
}

impl Answer {
    /// The fallback answer carrying no sources
    #[inline]
    pub fn no_information() -> Self {
        Self {
            text: NO_RELEVANT_INFORMATION.to_string(),
            citations: Vec::new(),
            references: Vec::new(),
        }
    }
}

/// A `[n]` marker in an answer resolved to its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationReference {
    pub citation_index: usize,
    pub book: String,
    pub page: PageRef,
}

/// Extra guidance when the sources come from different books
const MULTIPLE_BOOKS_GUIDELINES: &str = "\
- The sources come from different books and may disagree. If they contradict each other, \
point out the difference explicitly.\n\
- When sources disagree, present each perspective with its own citation and do not try to \
reconcile them.\n";

/// Build the generation prompt for `question` over the retrieved sources
#[inline]
pub fn build_prompt(question: &str, retrieved: &RetrievalContext) -> String {
    let books: HashSet<&str> = retrieved
        .citations
        .iter()
        .map(|citation| citation.book.as_str())
        .collect();
    let conflicts = if books.len() > 1 {
        MULTIPLE_BOOKS_GUIDELINES
    } else {
        ""
    };

    format!(
        "You are a research assistant answering questions from a private library of books.\n\
         \n\
         Guidelines:\n\
         - Answer only from the sources below. If they do not contain the answer, say so.\n\
         - Cite sources inline with their numbers, for example [1] or [2, 3].\n\
         - Mention page numbers when they are known.\n\
         {}\
         \n\
         Sources:\n\
         {}\n\
         \n\
         Excerpts:\n\
         {}\n\
         \n\
         Question: {}\n\
         Answer:",
        conflicts,
        retrieved.citation_list(),
        retrieved.context,
        question.trim()
    )
}

/// Resolve `[n]` and `[n, m]` markers in `answer` against `citations`.
///
/// Unknown numbers are ignored and each source is reported once, in the
/// order it is first cited.
#[inline]
pub fn extract_citation_references(
    answer: &str,
    citations: &[CitationGroup],
) -> Vec<CitationReference> {
    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for captures in CITATION_MARKER.captures_iter(answer).flatten() {
        let Some(numbers) = captures.get(1) else {
            continue;
        };

        for number in numbers.as_str().split(',') {
            let Ok(index) = number.trim().parse::<usize>() else {
                continue;
            };
            let Some(citation) = citations
                .iter()
                .find(|citation| citation.citation_index == index)
            else {
                continue;
            };
            if seen.insert(index) {
                references.push(CitationReference {
                    citation_index: index,
                    book: citation.book.clone(),
                    page: citation.page,
                });
            }
        }
    }

    references
}
