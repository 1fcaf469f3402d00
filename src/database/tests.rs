use super::*;

fn sample_chunk() -> Chunk {
    Chunk {
        text: "Chunk text".to_string(),
        book: "ignored_book".to_string(),
        page: PageRef::Number(4),
        ordinal: 2,
        start_offset: 10,
        end_offset: 20,
    }
}

#[test]
fn record_from_chunk_uses_given_book_and_position() {
    let created_at = Utc::now();
    let record = MetadataRecord::from_chunk("manual_1a2b3c4d", &sample_chunk(), 7, created_at);

    assert_eq!(record.book, "manual_1a2b3c4d");
    assert_eq!(record.text, "Chunk text");
    assert_eq!(record.page, PageRef::Number(4));
    assert_eq!(record.global_index, 7);
    assert_eq!(record.ordinal, 2);
    assert_eq!((record.start_offset, record.end_offset), (10, 20));
    assert_eq!(record.created_at, created_at);
}

#[test]
fn metadata_record_serialization() {
    let record = MetadataRecord::from_chunk("book", &sample_chunk(), 0, Utc::now());

    let json = serde_json::to_string(&record).expect("can serialize json");
    let deserialized: MetadataRecord = serde_json::from_str(&json).expect("can parse json");

    assert_eq!(record, deserialized);
}

#[test]
fn unknown_page_serialization() {
    let record = MetadataRecord {
        page: PageRef::Unknown,
        ..MetadataRecord::from_chunk("book", &sample_chunk(), 0, Utc::now())
    };

    let json = serde_json::to_string(&record).expect("can serialize json");
    let deserialized: MetadataRecord = serde_json::from_str(&json).expect("can parse json");

    assert_eq!(deserialized.page, PageRef::Unknown);
}
