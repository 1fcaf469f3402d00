use super::*;
use crate::documents::markers::PageRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

const VOCABULARY: [&str; 6] = ["apple", "banana", "cherry", "river", "mountain", "ocean"];

/// Counts vocabulary words; the trailing constant keeps every text embeddable
fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    vector.push(0.1);
    vector
}

fn unit(mut vector: Vec<f32>) -> Vec<f32> {
    normalize(&mut vector);
    vector
}

#[derive(Default)]
struct KeywordEmbedder {
    fail: AtomicBool,
    batch_calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("embedder offline".to_string()));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(keyword_vector(text)))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("embedder offline".to_string()));
        }
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }
}

/// Returns one vector fewer than asked for
struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        Ok(Some(keyword_vector(text)))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|text| keyword_vector(text)).collect())
    }
}

struct MapSource {
    books: Vec<(String, Vec<Chunk>)>,
    broken: Option<String>,
}

impl DocumentSource for MapSource {
    fn list_books(&self) -> Result<Vec<String>> {
        Ok(self.books.iter().map(|(book, _)| book.clone()).collect())
    }

    fn load_chunks(&self, book: &str) -> Result<Vec<Chunk>> {
        if self.broken.as_deref() == Some(book) {
            return Err(RagError::Extraction(format!("{} is unreadable", book)));
        }
        self.books
            .iter()
            .find(|(name, _)| name == book)
            .map(|(_, chunks)| chunks.clone())
            .ok_or_else(|| RagError::Extraction(format!("{} not found", book)))
    }
}

fn chunk(book: &str, text: &str, page: u32, ordinal: usize) -> Chunk {
    Chunk {
        text: text.to_string(),
        book: book.to_string(),
        page: PageRef::Number(page),
        ordinal,
        start_offset: ordinal * 100,
        end_offset: ordinal * 100 + text.len(),
    }
}

fn chunks(book: &str, texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(ordinal, text)| chunk(book, text, ordinal as u32 + 1, ordinal))
        .collect()
}

fn open_store(dir: &TempDir, embedder: Arc<dyn Embedder>) -> VectorStore {
    VectorStore::open(
        dir.path().join("data").join("index.json"),
        dir.path().join("data").join("metadata.json"),
        embedder,
    )
}

fn assert_aligned(store: &VectorStore) {
    let state = store.read_state();
    assert_eq!(state.index.len(), state.metadata.len());
    assert!(state.is_consistent());
}

#[test]
fn add_then_search_returns_closest_chunk() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));

    let added = store
        .add("fruit", &chunks("fruit", &["apple apple", "river ocean", "banana"]))
        .expect("add succeeds");
    assert_eq!(added, 3);
    assert_eq!(store.len(), 3);

    let results = store.search("apple", 1, 0.0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.text, "apple apple");
    assert_eq!(results[0].record.book, "fruit");
    assert_eq!(results[0].record.page, PageRef::Number(1));
    assert_aligned(&store);
}

#[test]
fn add_uses_one_batch_call() {
    let dir = TempDir::new().expect("temp dir");
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = open_store(&dir, embedder.clone());

    store
        .add("fruit", &chunks("fruit", &["apple", "banana", "cherry"]))
        .expect("add succeeds");
    assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_add_persists_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));

    assert_eq!(store.add("nothing", &[]).expect("empty add succeeds"), 0);
    assert!(store.is_empty());
    assert!(!dir.path().join("data").join("index.json").exists());
}

#[test]
fn search_never_returns_scores_at_or_below_threshold() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add(
            "mixed",
            &chunks("mixed", &["apple", "apple banana", "banana", "river"]),
        )
        .expect("add succeeds");

    let results = store.search("apple", 5, 0.4);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.score > 0.4));
    assert!(results[0].score >= results[1].score);
    assert_eq!(results[0].record.text, "apple");

    // An exact match scores 1.0, which is not above a 1.0 threshold
    assert!(store.search("apple", 5, 1.0).is_empty());
}

#[test]
fn search_respects_top_k() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add(
            "fruit",
            &chunks("fruit", &["apple", "apple cherry", "apple banana", "apple river"]),
        )
        .expect("add succeeds");

    assert_eq!(store.search("apple", 2, 0.0).len(), 2);
    assert!(store.search("apple", 0, 0.0).is_empty());
}

#[test]
fn search_handles_degenerate_inputs() {
    let dir = TempDir::new().expect("temp dir");
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = open_store(&dir, embedder.clone());

    assert!(store.search("apple", 5, 0.0).is_empty());

    store
        .add("fruit", &chunks("fruit", &["apple"]))
        .expect("add succeeds");
    assert!(store.search("   ", 5, 0.0).is_empty());

    embedder.set_failing(true);
    assert!(store.search("apple", 5, 0.0).is_empty());
}

#[test]
fn failed_embedding_leaves_store_unchanged() {
    let dir = TempDir::new().expect("temp dir");
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = open_store(&dir, embedder.clone());
    store
        .add("fruit", &chunks("fruit", &["apple", "banana"]))
        .expect("add succeeds");

    embedder.set_failing(true);
    let result = store.add("nature", &chunks("nature", &["river", "ocean"]));
    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(store.len(), 2);
    assert!(store.records_for_book("nature").is_empty());
    assert_aligned(&store);
}

#[test]
fn short_embedding_batch_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(ShortEmbedder));

    let result = store.add("fruit", &chunks("fruit", &["apple", "banana"]));
    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert!(store.is_empty());
    assert_aligned(&store);
}

#[test]
fn removing_a_book_twice() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("fruit", &chunks("fruit", &["apple", "banana", "cherry"]))
        .expect("add succeeds");
    store
        .add("nature", &chunks("nature", &["river", "mountain"]))
        .expect("add succeeds");
    let before = store.len();

    assert_eq!(store.remove("fruit").expect("remove succeeds"), 3);
    assert_eq!(store.len(), before - 3);
    assert_eq!(store.remove("fruit").expect("second remove succeeds"), 0);
    assert_eq!(store.len(), before - 3);
    assert_aligned(&store);
}

#[test]
fn remove_renumbers_survivors() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("fruit", &chunks("fruit", &["apple", "banana"]))
        .expect("add succeeds");
    store
        .add("nature", &chunks("nature", &["river", "mountain"]))
        .expect("add succeeds");

    store.remove("fruit").expect("remove succeeds");

    let records = store.records_for_book("nature");
    let positions: Vec<usize> = records.iter().map(|record| record.global_index).collect();
    assert_eq!(positions, vec![0, 1]);
    assert_eq!(records[1].ordinal, 1);

    let results = store.search("river", 1, 0.0);
    assert_eq!(results[0].record.text, "river");
}

#[test]
fn failed_remove_leaves_store_unchanged() {
    let dir = TempDir::new().expect("temp dir");
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = open_store(&dir, embedder.clone());
    store
        .add("fruit", &chunks("fruit", &["apple"]))
        .expect("add succeeds");
    store
        .add("nature", &chunks("nature", &["river"]))
        .expect("add succeeds");

    embedder.set_failing(true);
    assert!(store.remove("fruit").is_err());
    assert_eq!(store.len(), 2);
    assert_eq!(store.records_for_book("fruit").len(), 1);
    assert_aligned(&store);
}

#[test]
fn removing_the_last_book_empties_the_store() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("fruit", &chunks("fruit", &["apple", "banana"]))
        .expect("add succeeds");

    assert_eq!(store.remove("fruit").expect("remove succeeds"), 2);
    assert!(store.is_empty());
    assert!(store.search("apple", 5, 0.0).is_empty());

    // A fresh add may use any dimension again
    store
        .add("nature", &chunks("nature", &["river"]))
        .expect("add after emptying succeeds");
    assert_eq!(store.len(), 1);
}

#[test]
fn store_reloads_from_disk() {
    let dir = TempDir::new().expect("temp dir");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("fruit", &chunks("fruit", &["apple", "banana"]))
            .expect("add succeeds");
        store
            .add("nature", &chunks("nature", &["river"]))
            .expect("add succeeds");
    }

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert_eq!(reopened.len(), 3);
    assert_aligned(&reopened);

    let results = reopened.search("river", 1, 0.0);
    assert_eq!(results[0].record.book, "nature");
}

#[test]
fn corrupt_metadata_starts_empty() {
    let dir = TempDir::new().expect("temp dir");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("fruit", &chunks("fruit", &["apple"]))
            .expect("add succeeds");
    }
    fs::write(dir.path().join("data").join("metadata.json"), "{ not json")
        .expect("overwrite metadata");

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert!(reopened.is_empty());

    // The next mutation replaces both files
    reopened
        .add("nature", &chunks("nature", &["river"]))
        .expect("add succeeds");
    let again = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert_eq!(again.len(), 1);
}

#[test]
fn missing_index_file_starts_empty() {
    let dir = TempDir::new().expect("temp dir");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("fruit", &chunks("fruit", &["apple"]))
            .expect("add succeeds");
    }
    fs::remove_file(dir.path().join("data").join("index.json")).expect("remove index");

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert!(reopened.is_empty());
}

#[test]
fn files_from_different_writes_are_not_mixed() {
    let dir = TempDir::new().expect("temp dir");
    let metadata_path = dir.path().join("data").join("metadata.json");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("fruit", &chunks("fruit", &["apple"]))
            .expect("add succeeds");
    }
    let stale_metadata = fs::read_to_string(&metadata_path).expect("read metadata");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("nature", &chunks("nature", &["river"]))
            .expect("add succeeds");
    }
    fs::write(&metadata_path, stale_metadata).expect("restore stale metadata");

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert!(reopened.is_empty());
}

#[test]
fn persistence_failure_keeps_mutation() {
    let dir = TempDir::new().expect("temp dir");
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, "file").expect("create blocking file");

    let store = VectorStore::open(
        blocker.join("index.json"),
        blocker.join("metadata.json"),
        Arc::new(KeywordEmbedder::default()),
    );

    let result = store.add("fruit", &chunks("fruit", &["apple", "banana"]));
    assert!(matches!(result, Err(RagError::Database(_))));
    assert_eq!(store.len(), 2);
    assert_eq!(store.search("apple", 1, 0.0).len(), 1);
}

#[test]
fn interrupted_persist_keeps_previous_snapshot() {
    let dir = TempDir::new().expect("temp dir");
    let metadata_temp = dir.path().join("data").join("metadata.json.tmp");
    {
        let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
        store
            .add("fruit", &chunks("fruit", &["apple"]))
            .expect("add succeeds");

        fs::create_dir(&metadata_temp).expect("block metadata temp file");
        let result = store.add("nature", &chunks("nature", &["river"]));
        assert!(matches!(result, Err(RagError::Database(_))));
    }
    fs::remove_dir(&metadata_temp).expect("unblock metadata temp file");

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.records_for_book("fruit").len(), 1);
}

#[test]
fn reindex_rebuilds_from_source() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("stale", &chunks("stale", &["cherry"]))
        .expect("add succeeds");

    let source = MapSource {
        books: vec![
            ("fruit".to_string(), chunks("fruit", &["apple", "banana"])),
            ("nature".to_string(), chunks("nature", &["river"])),
        ],
        broken: None,
    };

    let summary = store.reindex(&source).expect("reindex succeeds");
    assert_eq!(
        summary,
        ReindexSummary {
            chunks: 3,
            books: 2,
            skipped: Vec::new(),
        }
    );
    assert!(store.records_for_book("stale").is_empty());
    assert_eq!(
        store.books(),
        vec![
            BookSummary {
                book: "fruit".to_string(),
                chunks: 2
            },
            BookSummary {
                book: "nature".to_string(),
                chunks: 1
            },
        ]
    );
    assert_aligned(&store);
}

#[test]
fn reindex_is_deterministic() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    let source = MapSource {
        books: vec![
            (
                "fruit".to_string(),
                chunks("fruit", &["apple", "banana cherry"]),
            ),
            ("nature".to_string(), chunks("nature", &["river ocean"])),
        ],
        broken: None,
    };
    let index_path = dir.path().join("data").join("index.json");

    let summarize = |store: &VectorStore| -> Vec<(String, PageRef, String, usize)> {
        store
            .books()
            .iter()
            .flat_map(|summary| store.records_for_book(&summary.book))
            .map(|record| (record.book, record.page, record.text, record.global_index))
            .collect()
    };

    store.reindex(&source).expect("first reindex");
    let first_records = summarize(&store);
    let first_index: Snapshot<FlatIndex> = read_json(&index_path).expect("read index");

    store.reindex(&source).expect("second reindex");
    let second_records = summarize(&store);
    let second_index: Snapshot<FlatIndex> = read_json(&index_path).expect("read index");

    assert_eq!(first_records, second_records);
    assert_eq!(first_index.payload, second_index.payload);
}

#[test]
fn reindex_skips_unreadable_books() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    let source = MapSource {
        books: vec![
            ("fruit".to_string(), chunks("fruit", &["apple"])),
            ("broken".to_string(), chunks("broken", &["river"])),
            ("nature".to_string(), chunks("nature", &["ocean"])),
        ],
        broken: Some("broken".to_string()),
    };

    let summary = store.reindex(&source).expect("reindex succeeds");
    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.books, 2);
    assert_eq!(summary.skipped, vec!["broken".to_string()]);
    assert!(store.records_for_book("broken").is_empty());
    assert_eq!(store.records_for_book("nature")[0].global_index, 1);
}

#[test]
fn reindex_during_embedding_outage_keeps_store() {
    let dir = TempDir::new().expect("temp dir");
    let embedder = Arc::new(KeywordEmbedder::default());
    let store = open_store(&dir, Arc::clone(&embedder) as Arc<dyn Embedder>);
    let source = MapSource {
        books: vec![
            ("fruit".to_string(), chunks("fruit", &["apple"])),
            ("nature".to_string(), chunks("nature", &["river"])),
        ],
        broken: None,
    };
    store.reindex(&source).expect("first reindex");

    embedder.set_failing(true);
    let result = store.reindex(&source);

    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(store.len(), 2);
    assert_aligned(&store);

    let reopened = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    assert_eq!(reopened.len(), 2);
}

#[test]
fn reindex_of_an_empty_source_empties_the_store() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("fruit", &chunks("fruit", &["apple"]))
        .expect("add succeeds");
    let source = MapSource {
        books: Vec::new(),
        broken: None,
    };

    let summary = store.reindex(&source).expect("reindex succeeds");

    assert_eq!(summary, ReindexSummary::default());
    assert!(store.is_empty());
}

#[test]
fn books_are_listed_in_first_appearance_order() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("zeta", &chunks("zeta", &["apple"]))
        .expect("add succeeds");
    store
        .add("alpha", &chunks("alpha", &["river", "ocean"]))
        .expect("add succeeds");

    let names: Vec<String> = store.books().into_iter().map(|summary| summary.book).collect();
    assert_eq!(names, vec!["zeta".to_string(), "alpha".to_string()]);
}

#[test]
fn overfetch_factor_has_a_floor() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default())).with_overfetch_factor(0);
    assert_eq!(store.overfetch_factor, 2);
}

#[test]
fn invariant_holds_across_mixed_operations() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    let source = MapSource {
        books: vec![("fruit".to_string(), chunks("fruit", &["apple", "cherry"]))],
        broken: None,
    };

    store
        .add("nature", &chunks("nature", &["river", "mountain", "ocean"]))
        .expect("add succeeds");
    assert_aligned(&store);
    store
        .add("fruit", &chunks("fruit", &["banana"]))
        .expect("add succeeds");
    assert_aligned(&store);
    store.remove("nature").expect("remove succeeds");
    assert_aligned(&store);
    store.reindex(&source).expect("reindex succeeds");
    assert_aligned(&store);
    store.remove("fruit").expect("remove succeeds");
    assert_aligned(&store);
    assert!(store.is_empty());
}

#[test]
fn concurrent_searches_see_consistent_state() {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(&dir, Arc::new(KeywordEmbedder::default()));
    store
        .add("seed", &chunks("seed", &["apple"]))
        .expect("add succeeds");

    let texts = ["apple river", "apple banana ocean", "cherry apple apple"];
    let expected: HashMap<&str, Vec<f32>> = texts
        .iter()
        .chain(std::iter::once(&"apple"))
        .map(|text| (*text, unit(keyword_vector(text))))
        .collect();
    let query = unit(keyword_vector("apple"));

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..10 {
                let book = format!("book{}", round);
                let batch: Vec<Chunk> = texts
                    .iter()
                    .enumerate()
                    .map(|(ordinal, text)| chunk(&book, text, 1, ordinal))
                    .collect();
                store.add(&book, &batch).expect("add succeeds");
            }
        });

        for _ in 0..3 {
            scope.spawn(|| {
                for _ in 0..20 {
                    for result in store.search("apple", 5, 0.0) {
                        let vector = &expected[result.record.text.as_str()];
                        let score: f32 = vector.iter().zip(&query).map(|(a, b)| a * b).sum();
                        assert!((score - result.score).abs() < 1e-5);
                    }
                }
            });
        }
    });

    assert_eq!(store.len(), 31);
    assert_aligned(&store);
}
