
use std::iter;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::documents::markers::{PageOffsetTable, PageRef, extract_page_markers};

/// Longest single line still treated as a heading
const HEADING_MAX_CHARS: usize = 80;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph pattern is valid"));

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("sentence pattern is valid")
});

/// Words that open a numbered heading such as "Chapter 3" or "Capítulo IV"
pub(crate) const HEADING_KEYWORDS: &str = r"chapter|cap[íi]tulo|section|secci[óo]n|part|parte";

static HEADING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:(?i:{})\s+(?:\d+|(?i:[ivxlcdm]+))\b|\d+(?:\.\d+)*\.?\s+\p{{Lu}})",
        HEADING_KEYWORDS
    ))
    .expect("heading pattern is valid")
});

/// A span of document text with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk text, an exact slice of the clean document text
    pub text: String,
    /// Identifier of the source document
    pub book: String,
    /// Page on which the chunk starts
    pub page: PageRef,
    /// Creation order within the book
    pub ordinal: usize,
    /// Byte offset of the chunk start in the clean text
    pub start_offset: usize,
    /// Byte offset one past the chunk end in the clean text
    pub end_offset: usize,
}

/// Configuration for page-aware chunking. Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Soft chunk size; paragraphs accumulate until the next one would exceed it
    pub target_chunk_size: usize,
    /// Hard ceiling; larger paragraphs are split by sentence, then by characters
    pub max_chunk_size: usize,
    /// Characters shared by consecutive character-split chunks
    pub overlap_size: usize,
    /// Close the running chunk when a new page starts
    pub split_at_page_boundaries: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 1000,
            max_chunk_size: 1500,
            overlap_size: 150,
            split_at_page_boundaries: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Strip page markers from raw extracted text and chunk the result
#[inline]
pub fn chunk_document(raw: &str, book: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let (clean, table) = extract_page_markers(raw);
    chunk_text(&clean, &table, book, config)
}

/// Chunk marker-free text, resolving each chunk's page from `table`
#[inline]
pub fn chunk_text(
    text: &str,
    table: &PageOffsetTable,
    book: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let chunks: Vec<Chunk> = split_spans(text, table, config)
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| Chunk {
            text: slice(text, span).to_string(),
            book: book.to_string(),
            page: table.resolve(span.start),
            ordinal,
            start_offset: span.start,
            end_offset: span.end,
        })
        .collect();

    debug!(
        "Chunked '{}' into {} chunks (avg {} chars)",
        book,
        chunks.len(),
        chunks.iter().map(|c| c.text.chars().count()).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

fn split_spans(text: &str, table: &PageOffsetTable, config: &ChunkingConfig) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut running: Option<Span> = None;

    for paragraph in paragraphs(text) {
        if char_len(text, paragraph) > config.max_chunk_size {
            spans.extend(running.take());
            split_oversized(text, paragraph, config, &mut spans);
            continue;
        }

        running = match running {
            Some(current) => {
                let merged = Span::new(current.start, paragraph.end);
                let closes = is_heading(slice(text, paragraph))
                    || (config.split_at_page_boundaries
                        && table.has_boundary_in(current.start, paragraph.start))
                    || char_len(text, merged) > config.target_chunk_size;

                if closes {
                    spans.push(current);
                    Some(paragraph)
                } else {
                    Some(merged)
                }
            }
            None => Some(paragraph),
        };
    }

    spans.extend(running);
    spans
}

/// Split a paragraph above the hard ceiling by sentences, falling back to
/// fixed-size character windows for sentences that are still too large
fn split_oversized(text: &str, paragraph: Span, config: &ChunkingConfig, spans: &mut Vec<Span>) {
    let mut group: Option<Span> = None;

    for sentence in sentences(text, paragraph) {
        if char_len(text, sentence) > config.max_chunk_size {
            spans.extend(group.take());
            hard_split(text, sentence, config, spans);
            continue;
        }

        group = match group {
            Some(current) => {
                let merged = Span::new(current.start, sentence.end);
                if char_len(text, merged) > config.max_chunk_size {
                    spans.push(current);
                    Some(sentence)
                } else {
                    Some(merged)
                }
            }
            None => Some(sentence),
        };
    }

    spans.extend(group);
}

/// Last resort: windows of `max_chunk_size` characters, consecutive windows
/// sharing exactly `overlap_size` characters
fn hard_split(text: &str, span: Span, config: &ChunkingConfig, spans: &mut Vec<Span>) {
    let boundaries: Vec<usize> = slice(text, span)
        .char_indices()
        .map(|(i, _)| span.start + i)
        .chain(iter::once(span.end))
        .collect();
    let char_count = boundaries.len() - 1;
    let window = config.max_chunk_size.max(1);
    let step = window.saturating_sub(config.overlap_size).max(1);

    let mut first = 0;
    loop {
        let last = (first + window).min(char_count);
        spans.push(Span::new(boundaries[first], boundaries[last]));
        if last == char_count {
            break;
        }
        first += step;
    }
}

fn paragraphs(text: &str) -> Vec<Span> {
    let mut result = Vec::new();
    let mut cursor = 0;

    for found in PARAGRAPH_BREAK.find_iter(text) {
        let found = match found {
            Ok(found) => found,
            Err(e) => {
                warn!("Paragraph scan stopped early: {}", e);
                break;
            }
        };
        result.extend(trim_span(text, Span::new(cursor, found.start())));
        cursor = found.end();
    }

    result.extend(trim_span(text, Span::new(cursor, text.len())));
    result
}

fn sentences(text: &str, paragraph: Span) -> Vec<Span> {
    let local = slice(text, paragraph);
    let mut result = Vec::new();
    let mut cursor = 0;

    for found in SENTENCE_END.find_iter(local) {
        let Ok(found) = found else {
            break;
        };
        let sentence_end = found.start() + found.as_str().trim_end().len();
        result.extend(trim_span(
            text,
            Span::new(paragraph.start + cursor, paragraph.start + sentence_end),
        ));
        cursor = found.end();
    }

    result.extend(trim_span(
        text,
        Span::new(paragraph.start + cursor, paragraph.end),
    ));
    result
}

/// Short single lines that are all caps, numbered ("2.1 Methods") or
/// labelled ("Chapter 3", "Capítulo IV")
fn is_heading(paragraph: &str) -> bool {
    if paragraph.contains('\n') || paragraph.chars().count() > HEADING_MAX_CHARS {
        return false;
    }

    if HEADING_PATTERN.is_match(paragraph).unwrap_or(false) {
        return true;
    }

    let (letters, uppercase) = paragraph
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0_usize, 0_usize), |(letters, uppercase), c| {
            (letters + 1, uppercase + usize::from(c.is_uppercase()))
        });
    letters >= 3 && letters == uppercase
}

fn trim_span(text: &str, span: Span) -> Option<Span> {
    let raw = slice(text, span);
    let start = span.start + (raw.len() - raw.trim_start().len());
    let end = span.start + raw.trim_end().len();
    (start < end).then_some(Span::new(start, end))
}

fn slice(text: &str, span: Span) -> &str {
    text.get(span.start..span.end).unwrap_or_default()
}

fn char_len(text: &str, span: Span) -> usize {
    slice(text, span).chars().count()
}
