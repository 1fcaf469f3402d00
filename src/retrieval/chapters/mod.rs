
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use fancy_regex::{Captures, Regex};
use serde::Serialize;
use tracing::debug;

use crate::database::MetadataRecord;
use crate::documents::markers::PageRef;
use crate::embeddings::chunking::HEADING_KEYWORDS;

const TITLE_MAX_CHARS: usize = 100;

/// "Chapter 3 ...", "Capítulo IV ..." or "2. Title" at the start of a line
static CHAPTER_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*(?:((?i:{}))[ \t]+(\d+|(?i:[ivxlcdm]+))\b|(\d+)\.[ \t]+\p{{Lu}})[^\n]*",
        HEADING_KEYWORDS
    ))
    .expect("chapter heading pattern is valid")
});

/// A chapter-like heading found in a book's indexed text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    /// Number as written in the heading, e.g. "3" or "IV"
    pub number: String,
    /// The heading line
    pub title: String,
    /// Page of the first chunk containing the heading
    pub page: PageRef,
    /// How many chunks contain the heading
    pub chunks: usize,
}

struct Heading {
    kind: String,
    number: String,
    value: u32,
    title: String,
}

/// Find chapter headings in the records of one book.
///
/// Headings are keyed by their kind ("chapter", "section", a numbered line)
/// and number; the first occurrence in record order gives the title and page.
/// The result is ordered by number, with first appearance breaking ties.
#[inline]
pub fn identify_chapters(records: &[MetadataRecord]) -> Vec<Chapter> {
    let mut found: Vec<(u32, Chapter)> = Vec::new();
    let mut positions: HashMap<(String, u32), usize> = HashMap::new();

    for record in records {
        let mut in_record = HashSet::new();

        for captures in CHAPTER_HEADING.captures_iter(&record.text).flatten() {
            let Some(heading) = parse_heading(&captures) else {
                continue;
            };
            let key = (heading.kind, heading.value);
            if !in_record.insert(key.clone()) {
                continue;
            }

            match positions.entry(key) {
                Entry::Occupied(entry) => {
                    if let Some((_, chapter)) = found.get_mut(*entry.get()) {
                        chapter.chunks += 1;
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(found.len());
                    found.push((
                        heading.value,
                        Chapter {
                            number: heading.number,
                            title: heading.title,
                            page: record.page,
                            chunks: 1,
                        },
                    ));
                }
            }
        }
    }

    found.sort_by_key(|(value, _)| *value);
    debug!(
        "Found {} chapter headings in {} chunks",
        found.len(),
        records.len()
    );
    found.into_iter().map(|(_, chapter)| chapter).collect()
}

fn parse_heading(captures: &Captures<'_>) -> Option<Heading> {
    let (kind, number) = match (captures.get(1), captures.get(2), captures.get(3)) {
        (Some(keyword), Some(number), _) => (fold_keyword(keyword.as_str()), number.as_str()),
        (_, _, Some(number)) => (String::new(), number.as_str()),
        _ => return None,
    };
    let value = number.parse().ok().or_else(|| roman_value(number))?;

    let line = captures.get(0)?.as_str().trim();
    let title: String = line.chars().take(TITLE_MAX_CHARS).collect();

    Some(Heading {
        kind,
        number: number.to_string(),
        value,
        title: title.trim_end().to_string(),
    })
}

/// "Capítulo" and "capitulo" name the same kind of heading
fn fold_keyword(keyword: &str) -> String {
    keyword
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'í' => 'i',
            'ó' => 'o',
            other => other,
        })
        .collect()
}

/// Value of a canonical Roman numeral such as "XIV"; anything else is `None`
fn roman_value(numeral: &str) -> Option<u32> {
    let upper = numeral.to_ascii_uppercase();
    let mut total: u32 = 0;
    let mut previous = 0;

    for c in upper.chars().rev() {
        let value = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        };
        if value < previous {
            total = total.checked_sub(value)?;
        } else {
            total = total.checked_add(value)?;
            previous = value;
        }
    }

    (total > 0 && to_roman(total) == upper).then_some(total)
}

fn to_roman(mut value: u32) -> String {
    const NUMERALS: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut roman = String::new();
    for (amount, numeral) in NUMERALS {
        while value >= amount {
            roman.push_str(numeral);
            value -= amount;
        }
    }
    roman
}
