use super::*;
use tempfile::TempDir;

#[test]
fn reads_plain_text() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("notes.TXT");
    fs::write(&path, "[PAGE:1]\nhello").expect("should write file");

    let text = PlainTextExtractor
        .extract(&path)
        .expect("plain text should extract");
    assert_eq!(text, "[PAGE:1]\nhello");
}

#[test]
fn rejects_unsupported_extension() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("scan.pdf");
    fs::write(&path, b"%PDF-1.4").expect("should write file");

    let result = PlainTextExtractor.extract(&path);
    assert!(matches!(result, Err(RagError::Extraction(_))));
}

#[test]
fn missing_file_is_an_extraction_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let result = PlainTextExtractor.extract(&temp_dir.path().join("absent.txt"));
    assert!(matches!(result, Err(RagError::Extraction(_))));
}

#[test]
fn invalid_utf8_is_replaced() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("latin1.txt");
    fs::write(&path, [b'c', b'a', 0xF1, b'a']).expect("should write file");

    let text = PlainTextExtractor
        .extract(&path)
        .expect("lossy decoding should succeed");
    assert!(text.starts_with("ca"));
    assert!(text.ends_with('a'));
}
