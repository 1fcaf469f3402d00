
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use fancy_regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Page marker patterns in priority order. When two patterns match
/// overlapping spans, the earlier one keeps the span.
static MARKER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // [PAGE:12], [Page 12], [página: 12]
        r"(?i)\[[ \t]*(?:page|p[áa]gina)[ \t]*:?[ \t]*(\d+)[ \t]*\]",
        // "Page 12", "Página 12 de 300", "- Pág. 12 -" alone on a line
        r"(?im)^[ \t]*[-–\[(]?[ \t]*(?:page|p[áa]gina|p[áa]g\.?)[ \t]+(\d{1,5})(?:[ \t]+(?:of|de)[ \t]+\d+)?[ \t]*[-–\])]?[ \t\r]*$",
        // "12" or "- 12 -" alone on a line
        r"(?m)^[ \t]*[-–]?[ \t]*(\d{1,4})[ \t]*[-–]?[ \t\r]*$",
        // "12-13" alone on a line
        r"(?m)^[ \t]*(\d{1,4})[ \t]*[-–][ \t]*(\d{1,4})[ \t\r]*$",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("page marker pattern is valid"))
    .collect()
});

/// Page provenance of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRef {
    Number(u32),
    Range { start: u32, end: u32 },
    #[default]
    Unknown,
}

impl PageRef {
    #[inline]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for PageRef {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(page) => write!(f, "{}", page),
            Self::Range { start, end } => write!(f, "{}-{}", start, end),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Ordered mapping from clean-text byte offset to the page that begins there
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOffsetTable {
    entries: Vec<(usize, PageRef)>,
}

impl PageOffsetTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page starting at `offset`. Entries sharing an offset keep
    /// insertion order, so the latest one wins on lookup.
    #[inline]
    pub fn insert(&mut self, offset: usize, page: PageRef) {
        let position = self.entries.partition_point(|(o, _)| *o <= offset);
        self.entries.insert(position, (offset, page));
    }

    /// Page of the greatest recorded offset not after `offset`
    #[inline]
    pub fn resolve(&self, offset: usize) -> PageRef {
        match self.entries.partition_point(|(o, _)| *o <= offset) {
            0 => PageRef::Unknown,
            position => self.entries[position - 1].1,
        }
    }

    /// Whether a page starts in `(after, up_to]`
    #[inline]
    pub fn has_boundary_in(&self, after: usize, up_to: usize) -> bool {
        let before = self.entries.partition_point(|(o, _)| *o <= after);
        let through = self.entries.partition_point(|(o, _)| *o <= up_to);
        through > before
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &(usize, PageRef)> {
        self.entries.iter()
    }
}

impl FromIterator<(usize, PageRef)> for PageOffsetTable {
    #[inline]
    fn from_iter<T: IntoIterator<Item = (usize, PageRef)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (offset, page) in iter {
            table.insert(offset, page);
        }
        table
    }
}

/// Strip page markers from extracted text.
///
/// Returns the clean text and a table mapping each marker's position in the
/// clean text to its page. Pages are recorded as found: duplicates and
/// out-of-order numbers are kept.
#[inline]
pub fn extract_page_markers(raw: &str) -> (String, PageOffsetTable) {
    // start -> (end, page); accepted spans never overlap
    let mut accepted: BTreeMap<usize, (usize, PageRef)> = BTreeMap::new();

    for pattern in MARKER_PATTERNS.iter() {
        for captures in pattern.captures_iter(raw) {
            let captures = match captures {
                Ok(captures) => captures,
                Err(e) => {
                    warn!("Page marker scan aborted: {}", e);
                    break;
                }
            };
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let (start, end) = (whole.start(), whole.end());

            let overlaps = accepted
                .range(..end)
                .next_back()
                .is_some_and(|(_, (previous_end, _))| *previous_end > start);
            if overlaps {
                continue;
            }

            if let Some(page) = page_from_captures(&captures) {
                accepted.insert(start, (end, page));
            }
        }
    }

    let mut clean = String::with_capacity(raw.len());
    let mut table = PageOffsetTable::new();
    let mut cursor = 0;

    for (start, (end, page)) in accepted {
        clean.push_str(raw.get(cursor..start).unwrap_or_default());
        // An inline marker between two words still separates them
        let joins_words = clean
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace())
            && raw
                .get(end..)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| !c.is_whitespace());
        if joins_words {
            clean.push(' ');
        }
        table.insert(clean.len(), page);
        cursor = end;
    }
    clean.push_str(raw.get(cursor..).unwrap_or_default());

    debug!(
        "Extracted {} page markers ({} -> {} bytes)",
        table.len(),
        raw.len(),
        clean.len()
    );

    (clean, table)
}

/// Page numbers start at 1; a zero is left in the text as content
fn page_from_captures(captures: &Captures<'_>) -> Option<PageRef> {
    let start = parse_page(captures.get(1)?.as_str())?;
    match captures.get(2) {
        Some(end) => Some(PageRef::Range {
            start,
            end: parse_page(end.as_str())?,
        }),
        None => Some(PageRef::Number(start)),
    }
}

fn parse_page(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok().filter(|page| *page > 0)
}
