use super::*;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write test document");
    path
}

#[test]
fn formats_from_extension() {
    assert_eq!(DocumentFormat::from_extension("txt"), Some(DocumentFormat::PlainText));
    assert_eq!(DocumentFormat::from_extension(".MD"), Some(DocumentFormat::Markdown));
    assert_eq!(DocumentFormat::from_extension("htm"), Some(DocumentFormat::Html));
    assert_eq!(DocumentFormat::from_extension("json"), Some(DocumentFormat::Json));
    assert_eq!(DocumentFormat::from_extension("pdf"), None);
    assert_eq!(DocumentFormat::from_extension(""), None);
}

#[test]
fn clean_text_collapses_whitespace() {
    let cleaned = clean_text("  Opening   hours \n\n\n\n  Mon-Fri\t 9-17  \n   \nSat closed");
    assert_eq!(cleaned, "Opening hours\nMon-Fri 9-17\nSat closed");
}

#[test]
fn markdown_drops_heading_markers() {
    let markdown = "# Return Policy\n\nReturns are accepted within **30 days**.\n\n## Exceptions\n\n- Sale items\n- Gift cards\n";
    let extracted = extract_text(markdown, DocumentFormat::Markdown).expect("markdown parses");

    assert_eq!(extracted.title.as_deref(), Some("Return Policy"));
    assert_eq!(
        extracted.text,
        "Return Policy\nReturns are accepted within 30 days.\nExceptions\n- Sale items\n- Gift cards"
    );
    assert!(!extracted.text.contains('#'));
}

#[test]
fn markdown_without_top_heading_has_no_title() {
    let extracted = extract_text("## Shipping\n\nWe ship worldwide.", DocumentFormat::Markdown)
        .expect("markdown parses");
    assert_eq!(extracted.title, None);
    assert_eq!(extracted.text, "Shipping\nWe ship worldwide.");
}

#[test]
fn html_keeps_visible_text_only() {
    let html = r#"<html>
        <head><title> Store FAQ </title><style>body { color: red; }</style></head>
        <body>
            <h1>Questions</h1>
            <script>console.log("tracking");</script>
            <p>We ship   worldwide.</p>
            <ul><li>Fast</li><li>Cheap</li></ul>
        </body>
    </html>"#;
    let extracted = extract_text(html, DocumentFormat::Html).expect("html parses");

    assert_eq!(extracted.title.as_deref(), Some("Store FAQ"));
    assert_eq!(extracted.text, "Questions\nWe ship worldwide.\nFast\nCheap");
    assert!(!extracted.text.contains("tracking"));
    assert!(!extracted.text.contains("color"));
}

#[test]
fn json_is_pretty_printed() {
    let extracted = extract_text(r#"{"hours":{"weekday":"9-17"}}"#, DocumentFormat::Json)
        .expect("json parses");
    assert_eq!(extracted.text, "{\n\"hours\": {\n\"weekday\": \"9-17\"\n}\n}");

    let error = extract_text("{not json", DocumentFormat::Json).expect_err("invalid json");
    assert!(matches!(error, RagError::Ingestion(_)));
}

#[test]
fn empty_documents_are_rejected() {
    let error = extract_text(" \n\n\t ", DocumentFormat::PlainText).expect_err("empty text");
    assert!(matches!(error, RagError::Ingestion(_)));

    let error = extract_text("<html><body><script>x()</script></body></html>", DocumentFormat::Html)
        .expect_err("no visible text");
    assert!(matches!(error, RagError::Ingestion(_)));
}

#[test]
fn parse_document_reads_file_and_metadata() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let contents = b"Returns accepted within 30 days.\n\n\n\nRefunds take   5 days.";
    let path = write_file(&temp_dir, "Policies.TXT", contents);

    let parsed = parse_document(&path).expect("document parses");
    assert_eq!(
        parsed.text,
        "Returns accepted within 30 days.\nRefunds take 5 days."
    );
    assert_eq!(parsed.title, None);
    assert_eq!(
        parsed.metadata,
        DocumentMetadata {
            filename: "Policies.TXT".to_string(),
            size: contents.len() as u64,
            extension: "txt".to_string(),
        }
    );
}

#[test]
fn parse_document_rejects_unsupported_files() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_file(&temp_dir, "manual.pdf", b"%PDF-1.7");

    let error = parse_document(&path).expect_err("pdf is unsupported");
    match error {
        RagError::Ingestion(message) => assert!(message.contains(".pdf not supported")),
        other => panic!("unexpected error: {other}"),
    }

    let missing = parse_document(&temp_dir.path().join("missing.md")).expect_err("missing file");
    assert!(matches!(missing, RagError::Ingestion(_)));
}

#[test]
fn parse_document_rejects_oversized_files() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("huge.txt");
    let file = fs::File::create(&path).expect("Failed to create file");
    file.set_len(MAX_DOCUMENT_BYTES + 1)
        .expect("Failed to size file");

    let error = parse_document(&path).expect_err("file is too large");
    match error {
        RagError::Ingestion(message) => assert!(message.contains("10MB")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parse_document_rejects_invalid_utf8() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_file(&temp_dir, "binary.txt", &[0xff, 0xfe, 0x00, 0x41]);

    let error = parse_document(&path).expect_err("not utf-8");
    assert!(matches!(error, RagError::Ingestion(_)));
}
