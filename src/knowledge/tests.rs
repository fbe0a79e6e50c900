use super::*;
use crate::embeddings::HashedEmbedder;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const ECOMMERCE: &str = "ECOMMERCE_BUSINESS_CONTEXT";

async fn open_store() -> (TempDir, KnowledgeStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = KnowledgeStore::open(&Config::with_base_dir(temp_dir.path()))
        .await
        .expect("Failed to open knowledge store");
    (temp_dir, store)
}

/// Hashed embedder that refuses any text mentioning "poison"
#[derive(Debug)]
struct PoisonedEmbedder(HashedEmbedder);

impl EmbeddingModel for PoisonedEmbedder {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn name(&self) -> String {
        "poisoned".to_string()
    }

    fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        if text.contains("poison") {
            Err(RagError::Embedding("model rejected input".to_string()))
        } else {
            self.0.embed(text)
        }
    }
}

/// Advertises one dimension and produces another
#[derive(Debug)]
struct ShortEmbedder;

impl EmbeddingModel for ShortEmbedder {
    fn dimension(&self) -> usize {
        300
    }

    fn name(&self) -> String {
        "short".to_string()
    }

    fn embed(&self, _text: &str) -> Result<EmbeddingVector> {
        Ok(vec![1.0; 5])
    }
}

/// Hashed embedder that counts single and batch calls and reports itself down
#[derive(Debug)]
struct CountingEmbedder {
    inner: HashedEmbedder,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashedEmbedder::new(300).expect("valid dimension"),
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingModel for CountingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> String {
        "counting".to_string()
    }

    fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        texts.iter().map(|text| self.inner.embed(text)).collect()
    }

    fn health_check(&self) -> Result<()> {
        Err(RagError::Embedding("backend offline".to_string()))
    }
}

async fn store_with_embedder(
    embedder: Arc<dyn EmbeddingModel>,
    chunker: TextChunker,
) -> (TempDir, KnowledgeStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("Failed to create database");
    let index = VectorIndex::open(temp_dir.path().join("index"), embedder.dimension())
        .expect("Failed to open index");
    let store = KnowledgeStore::new(
        database,
        embedder,
        Arc::new(index),
        chunker,
        RetrievalConfig::default(),
    );
    (temp_dir, store)
}

fn return_policy() -> NewKnowledgeEntry {
    NewKnowledgeEntry::new("Return Policy", "Returns accepted within 30 days")
        .with_category(ECOMMERCE)
        .with_tags(["returns"])
}

fn shipping() -> NewKnowledgeEntry {
    NewKnowledgeEntry::new("Shipping", "We ship worldwide in 3-5 days")
        .with_category(ECOMMERCE)
        .with_tags(["shipping"])
}

fn ids(entries: &[KnowledgeEntry]) -> Vec<i64> {
    entries.iter().map(|entry| entry.id).collect()
}

#[tokio::test]
async fn add_entry_embeds_title_and_content() {
    let (_temp_dir, store) = open_store().await;

    let entry = store.add_entry(return_policy()).await.expect("add entry");

    let expected = HashedEmbedder::new(300)
        .expect("valid dimension")
        .embed_text("Return Policy Returns accepted within 30 days");
    assert_eq!(entry.embedding, Some(expected));
    assert!(entry.is_active);
    assert_eq!(store.index().len(), 1);
}

#[tokio::test]
async fn add_entry_rejects_blank_fields() {
    let (_temp_dir, store) = open_store().await;

    let error = store
        .add_entry(NewKnowledgeEntry::new("  ", "content"))
        .await
        .expect_err("blank title");
    assert!(matches!(error, RagError::InvalidInput(_)));
    assert!(store.index().is_empty());
}

#[tokio::test]
async fn search_scopes_by_category() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");
    store.add_entry(shipping()).await.expect("add entry");
    store
        .add_entry(
            NewKnowledgeEntry::new("Returns API", "Return endpoints for developers")
                .with_category("SAAS_BUSINESS_CONTEXT"),
        )
        .await
        .expect("add entry");

    let results = store
        .search("How do I return an item?", 1, Some(ECOMMERCE))
        .await
        .expect("search");
    assert_eq!(ids(&results), vec![policy.id]);

    let scoped = store
        .search("return", 10, Some(ECOMMERCE))
        .await
        .expect("search");
    assert!(
        scoped
            .iter()
            .all(|entry| entry.category.as_deref() == Some(ECOMMERCE))
    );
}

#[tokio::test]
async fn search_breaks_ties_by_id_and_applies_floor() {
    let (_temp_dir, store) = open_store().await;
    let first = store
        .add_entry(NewKnowledgeEntry::new("Gift Cards", "Gift cards never expire"))
        .await
        .expect("add entry");
    let second = store
        .add_entry(NewKnowledgeEntry::new("Gift Cards", "Gift cards never expire"))
        .await
        .expect("add entry");
    store.add_entry(shipping()).await.expect("add entry");

    let scored = store
        .search_scored("gift cards expire", 2, None, 0.05)
        .await
        .expect("search");
    assert_eq!(
        scored.iter().map(|hit| hit.entry.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    assert_eq!(scored[0].score.to_bits(), scored[1].score.to_bits());

    let nothing = store
        .search_scored("gift cards expire", 5, None, 1.01)
        .await
        .expect("search");
    assert!(nothing.is_empty());

    assert!(
        store
            .search("gift", 0, None)
            .await
            .expect("search")
            .is_empty()
    );
}

#[tokio::test]
async fn soft_delete_hides_entry_everywhere() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");
    let ship = store.add_entry(shipping()).await.expect("add entry");

    assert!(store.deactivate(policy.id).await.expect("deactivate"));
    assert!(!store.deactivate(999).await.expect("deactivate unknown"));

    let searched = store
        .search("Return Policy Returns accepted within 30 days", 10, None)
        .await
        .expect("search");
    assert!(!ids(&searched).contains(&policy.id));
    assert_eq!(
        ids(&store.by_category(ECOMMERCE, 10).await.expect("by category")),
        vec![ship.id]
    );
    assert!(
        store
            .by_tags(&["returns".to_string()], 10)
            .await
            .expect("by tags")
            .is_empty()
    );
    assert!(store.get(policy.id).await.expect("get").is_none());
    assert!(
        store
            .search_index("Return Policy Returns accepted within 30 days", 10, None)
            .await
            .expect("index search")
            .iter()
            .all(|hit| hit.knowledge_id != policy.id)
    );
    assert_eq!(store.index().len(), 1);

    // Row is still stored
    let stored = KnowledgeQueries::get_by_id(store.database().pool(), policy.id)
        .await
        .expect("query")
        .expect("row kept");
    assert!(!stored.is_active);

    assert!(store.reactivate(policy.id).await.expect("reactivate"));
    assert_eq!(store.index().len(), 2);
    assert!(store.get(policy.id).await.expect("get").is_some());
}

#[tokio::test]
async fn related_entries_exclude_source() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");
    let refunds = store
        .add_entry(NewKnowledgeEntry::new(
            "Refund Policy",
            "Refunds for returns accepted within 14 days",
        ))
        .await
        .expect("add entry");
    store
        .add_entry(NewKnowledgeEntry::new("Office Hours", "Open Monday to Friday"))
        .await
        .expect("add entry");

    let related = store
        .related_entries(policy.id, 5)
        .await
        .expect("related entries");
    assert!(!ids(&related).contains(&policy.id));
    assert_eq!(related.first().map(|entry| entry.id), Some(refunds.id));

    let one = store
        .related_entries(policy.id, 1)
        .await
        .expect("related entries");
    assert_eq!(ids(&one), vec![refunds.id]);

    assert!(
        store
            .related_entries(999, 5)
            .await
            .expect("related entries")
            .is_empty()
    );
}

#[tokio::test]
async fn related_entries_skip_inactive_source() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");
    store
        .add_entry(NewKnowledgeEntry::new(
            "Refund Policy",
            "Refunds for returns accepted within 14 days",
        ))
        .await
        .expect("add entry");

    assert!(store.deactivate(policy.id).await.expect("deactivate"));
    assert!(
        store
            .related_entries(policy.id, 5)
            .await
            .expect("related entries")
            .is_empty()
    );

    assert!(store.reactivate(policy.id).await.expect("reactivate"));
    assert_eq!(
        store
            .related_entries(policy.id, 5)
            .await
            .expect("related entries")
            .len(),
        1
    );
}

#[tokio::test]
async fn by_tags_matches_any_tag() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");
    let ship = store.add_entry(shipping()).await.expect("add entry");
    store
        .add_entry(NewKnowledgeEntry::new("Hours", "9 to 5").with_tags(["hours"]))
        .await
        .expect("add entry");

    let tagged = store
        .by_tags(&["shipping".to_string(), "returns".to_string()], 10)
        .await
        .expect("by tags");
    assert_eq!(ids(&tagged), vec![policy.id, ship.id]);

    let limited = store
        .by_tags(&["shipping".to_string(), "returns".to_string()], 1)
        .await
        .expect("by tags");
    assert_eq!(ids(&limited), vec![policy.id]);
}

#[tokio::test]
async fn update_entry_recomputes_embedding_on_text_change() {
    let (_temp_dir, store) = open_store().await;
    let policy = store.add_entry(return_policy()).await.expect("add entry");

    let retagged = store
        .update_entry(
            policy.id,
            &KnowledgeUpdate {
                tags: Some(vec!["policy".to_string()]),
                ..KnowledgeUpdate::default()
            },
        )
        .await
        .expect("update")
        .expect("entry exists");
    assert_eq!(retagged.embedding, policy.embedding);
    assert_eq!(retagged.tags, vec!["policy"]);

    let edited = store
        .update_entry(
            policy.id,
            &KnowledgeUpdate {
                content: Some("Returns accepted within 60 days".to_string()),
                ..KnowledgeUpdate::default()
            },
        )
        .await
        .expect("update")
        .expect("entry exists");
    let expected = HashedEmbedder::new(300)
        .expect("valid dimension")
        .embed_text("Return Policy Returns accepted within 60 days");
    assert_eq!(edited.embedding, Some(expected.clone()));

    let stored = store.get(policy.id).await.expect("get").expect("active");
    assert_eq!(stored.content, "Returns accepted within 60 days");
    assert_eq!(stored.embedding, Some(expected));

    let previews = store
        .search_index("Return Policy Returns accepted within 60 days", 1, None)
        .await
        .expect("index search");
    assert_eq!(previews[0].text_preview, "Returns accepted within 60 days");

    let invalid = store
        .update_entry(
            policy.id,
            &KnowledgeUpdate {
                content: Some(String::new()),
                ..KnowledgeUpdate::default()
            },
        )
        .await
        .expect_err("empty content");
    assert!(matches!(invalid, RagError::InvalidInput(_)));

    assert!(
        store
            .update_entry(999, &KnowledgeUpdate::default())
            .await
            .expect("update")
            .is_none()
    );
}

#[tokio::test]
async fn update_embedding_rewrites_single_entry() {
    let (_temp_dir, store) = open_store().await;
    let created = KnowledgeQueries::create(
        store.database().pool(),
        &NewKnowledgeEntry::new("Hours", "Open 9 to 5"),
        None,
    )
    .await
    .expect("create");

    assert!(store.update_embedding(created.id).await.expect("update"));
    assert!(!store.update_embedding(999).await.expect("update unknown"));

    let stored = store.get(created.id).await.expect("get").expect("active");
    assert!(stored.embedding.is_some());
    assert_eq!(store.index().len(), 1);
}

#[tokio::test]
async fn bulk_update_skips_failures() {
    let embedder = Arc::new(PoisonedEmbedder(
        HashedEmbedder::new(300).expect("valid dimension"),
    ));
    let (_temp_dir, store) = store_with_embedder(embedder, TextChunker::default()).await;
    let pool = store.database().pool();

    for (title, content) in [
        ("Hours", "Open 9 to 5"),
        ("Broken", "This one is poison"),
        ("Parking", "Free parking behind the store"),
    ] {
        KnowledgeQueries::create(pool, &NewKnowledgeEntry::new(title, content), None)
            .await
            .expect("create");
    }

    let updated = store.bulk_update_embeddings().await.expect("bulk update");
    assert_eq!(updated, 2);
    assert_eq!(store.index().len(), 2);

    let missing = KnowledgeQueries::list_active_missing_embeddings(pool)
        .await
        .expect("list");
    assert_eq!(
        missing.iter().map(|e| e.title.as_str()).collect::<Vec<_>>(),
        vec!["Broken"]
    );

    assert_eq!(store.bulk_update_embeddings().await.expect("bulk update"), 0);
}

#[tokio::test]
async fn embedding_dimension_is_checked() {
    let (_temp_dir, store) = store_with_embedder(Arc::new(ShortEmbedder), TextChunker::default()).await;

    let error = store
        .add_entry(return_policy())
        .await
        .expect_err("wrong dimension");
    assert!(matches!(
        error,
        RagError::DimensionMismatch {
            expected: 300,
            actual: 5
        }
    ));
    assert!(error.is_configuration());
}

#[tokio::test]
async fn stats_report_coverage_and_categories() {
    let (_temp_dir, store) = open_store().await;
    store.add_entry(return_policy()).await.expect("add entry");
    store.add_entry(shipping()).await.expect("add entry");
    KnowledgeQueries::create(
        store.database().pool(),
        &NewKnowledgeEntry::new("Loose", "No category"),
        None,
    )
    .await
    .expect("create");

    let stats = store.stats().await.expect("stats");
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.entries_with_embeddings, 2);
    assert!((stats.embedding_coverage - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        stats.categories,
        vec![CategoryCount {
            name: ECOMMERCE.to_string(),
            count: 2
        }]
    );
    assert_eq!(stats.embedding_model, "hashed");
    assert_eq!(stats.index.total_vectors, 2);
    assert_eq!(stats.index.dimension, 300);
}

#[tokio::test]
async fn empty_store_stats() {
    let (_temp_dir, store) = open_store().await;
    let stats = store.stats().await.expect("stats");
    assert_eq!(stats.total_entries, 0);
    assert!(stats.embedding_coverage.abs() < f64::EPSILON);
    assert!(stats.categories.is_empty());
}

#[tokio::test]
async fn search_index_returns_previews() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.retrieval.preview_chars = 10;
    let store = KnowledgeStore::open(&config).await.expect("open store");

    let policy = store.add_entry(return_policy()).await.expect("add entry");
    store.add_entry(shipping()).await.expect("add entry");

    let hits = store
        .search_index("Return Policy Returns accepted within 30 days", 5, Some(ECOMMERCE))
        .await
        .expect("index search");
    assert_eq!(hits[0].knowledge_id, policy.id);
    assert_eq!(hits[0].title, "Return Policy");
    assert_eq!(hits[0].text_preview, "Returns ac...");
    assert!(hits.iter().all(|hit| hit.score >= 0.3));

    let mut seen = HashSet::new();
    assert!(hits.iter().all(|hit| seen.insert(hit.knowledge_id)));
}

#[tokio::test]
async fn ingest_document_chunks_with_part_titles() {
    let (_temp_dir, store) = store_with_embedder(
        Arc::new(HashedEmbedder::new(300).expect("valid dimension")),
        TextChunker::with_sizes(100, 20),
    )
    .await;

    let raw = "Orders ship within two business days. ".repeat(8);
    let outcome = store
        .ingest_document(IngestRequest::for_scenario("ecommerce", raw.clone(), "faq.txt"))
        .await
        .expect("ingest");

    assert!(outcome.chunks_created > 1);
    assert_eq!(outcome.entries.len(), outcome.chunks_created);
    assert_eq!(outcome.total_characters, raw.chars().count());
    for (i, entry) in outcome.entries.iter().enumerate() {
        assert_eq!(entry.title, format!("faq.txt - Part {}", i + 1));
        assert_eq!(entry.category.as_deref(), Some(ECOMMERCE));
        assert_eq!(entry.tags, vec!["ecommerce", "business_context", "uploaded"]);
        assert_eq!(entry.source.as_deref(), Some("faq.txt"));
        assert!(entry.content.chars().count() <= 100);
    }
    assert_eq!(store.index().len(), outcome.chunks_created);

    let titled = store
        .ingest_document(IngestRequest::new("Short note.", "note.md").with_title("Note"))
        .await
        .expect("ingest");
    assert_eq!(titled.chunks_created, 1);
    assert_eq!(titled.entries[0].title, "Note");
    assert_eq!(titled.entries[0].content, "Short note.");
    assert_eq!(titled.entries[0].category, None);

    let error = store
        .ingest_document(IngestRequest::new("   ", "empty.txt"))
        .await
        .expect_err("empty document");
    assert!(matches!(error, RagError::Ingestion(_)));
}

#[tokio::test]
async fn reopen_restores_index() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config::with_base_dir(temp_dir.path());

    let policy = {
        let store = KnowledgeStore::open(&config).await.expect("open store");
        store.add_entry(return_policy()).await.expect("add entry")
    };

    let store = KnowledgeStore::open(&config).await.expect("reopen store");
    assert_eq!(store.index().len(), 1);
    let results = store
        .search("How do I return an item?", 1, Some(ECOMMERCE))
        .await
        .expect("search");
    assert_eq!(ids(&results), vec![policy.id]);
}

#[tokio::test]
async fn rebuild_index_migrates_embeddings() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = Config::with_base_dir(temp_dir.path());
    {
        let store = KnowledgeStore::open(&config).await.expect("open store");
        store.add_entry(return_policy()).await.expect("add entry");
        store.add_entry(shipping()).await.expect("add entry");
    }

    config.embedding.dimension = 600;
    let store = KnowledgeStore::open(&config).await.expect("reopen store");
    assert!(store.index().is_empty());

    let error = store
        .search("return", 1, None)
        .await
        .expect_err("stored embeddings have the old dimension");
    assert!(error.is_configuration());

    assert_eq!(store.rebuild_index().await.expect("rebuild"), 2);
    assert_eq!(store.index().len(), 2);
    assert_eq!(store.index().dimension(), 600);

    let results = store
        .search("How do I return an item?", 1, Some(ECOMMERCE))
        .await
        .expect("search");
    assert_eq!(results[0].title, "Return Policy");
    assert_eq!(results[0].embedding.as_ref().map(Vec::len), Some(600));
}

#[tokio::test]
async fn bulk_work_embeds_in_batches() {
    let embedder = Arc::new(CountingEmbedder::new());
    let (_temp_dir, store) = store_with_embedder(
        Arc::clone(&embedder) as Arc<dyn EmbeddingModel>,
        TextChunker::default(),
    )
    .await;
    let pool = store.database().pool();

    for (title, content) in [
        ("Hours", "Open 9 to 5"),
        ("Parking", "Free parking behind the store"),
        ("Returns", "Returns accepted within 30 days"),
    ] {
        KnowledgeQueries::create(pool, &NewKnowledgeEntry::new(title, content), None)
            .await
            .expect("create");
    }

    assert_eq!(store.bulk_update_embeddings().await.expect("bulk update"), 3);
    assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);

    assert_eq!(store.rebuild_index().await.expect("rebuild"), 3);
    assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(embedder.single_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.index().len(), 3);
}

#[tokio::test]
async fn embedder_health_reports_backend_state() {
    let (_temp_dir, store) = open_store().await;
    store.embedder_health().await.expect("hashed embedder is always ready");

    let (_temp_dir, store) =
        store_with_embedder(Arc::new(CountingEmbedder::new()), TextChunker::default()).await;
    let error = store
        .embedder_health()
        .await
        .expect_err("counting embedder reports itself down");
    assert!(error.to_string().contains("backend offline"));
}

#[test]
fn preview_truncates_on_char_boundary() {
    assert_eq!(preview("short", 10), "short");
    assert_eq!(preview("exactly10!", 10), "exactly10!");
    assert_eq!(preview("héllo wörld", 4), "héll...");
    assert_eq!(preview("", 3), "");
}

#[test]
fn ingest_request_for_scenario() {
    let request = IngestRequest::for_scenario("florist", "text", "menu.txt").with_title("Menu");
    assert_eq!(request.category.as_deref(), Some("FLORIST_BUSINESS_CONTEXT"));
    assert_eq!(request.tags, vec!["florist", "business_context", "uploaded"]);
    assert_eq!(request.title.as_deref(), Some("Menu"));
    assert_eq!(request.source, "menu.txt");
}
