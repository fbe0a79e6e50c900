use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::sqlite::{KnowledgeEntry, NewKnowledgeEntry};
use crate::generation::{OllamaGenerator, SupportAssistant};
use crate::knowledge::{IngestRequest, KnowledgeStore, parse_document, preview};
use crate::prompt::{ChatTurn, PromptAssembler, Scenario, ScenarioCatalog, analyze_context_gaps};

async fn open_store(config: &Config) -> Result<KnowledgeStore> {
    KnowledgeStore::open(config)
        .await
        .context("Failed to open knowledge store")
}

fn spinner(template: &str) -> ProgressBar {
    if console::user_attended_stderr() {
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner().with_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    } else {
        ProgressBar::hidden()
    }
}

fn print_entry(entry: &KnowledgeEntry, preview_chars: usize) {
    println!("📄 {} (ID: {})", entry.title, entry.id);
    if let Some(category) = &entry.category {
        println!("   Category: {}", category);
    }
    if !entry.tags.is_empty() {
        println!("   Tags: {}", entry.tags.join(", "));
    }
    if let Some(source) = &entry.source {
        println!("   Source: {}", source);
    }
    println!("   {}", preview(&entry.content, preview_chars));
}

/// Load a conversation history from a JSON array of `{role, content}` turns
#[inline]
pub fn load_history(path: Option<&Path>) -> Result<Vec<ChatTurn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse history file {}", path.display()))
}

/// Add a single knowledge entry
#[inline]
pub async fn add_entry(
    config: &Config,
    title: String,
    content: String,
    category: Option<String>,
    tags: Vec<String>,
    source: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;

    let mut entry = NewKnowledgeEntry::new(title, content).with_tags(tags);
    if let Some(category) = category {
        entry = entry.with_category(category);
    }
    if let Some(source) = source {
        entry = entry.with_source(source);
    }

    let created = store.add_entry(entry).await?;
    info!("Added knowledge entry {}", created.id);
    println!("✅ Added: {} (ID: {})", created.title, created.id);

    Ok(())
}

/// Parse a document and split it into knowledge entries
#[inline]
pub async fn ingest_file(
    config: &Config,
    path: &Path,
    scenario: Option<&str>,
    title: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;

    let bar = spinner("{spinner} {msg}");
    bar.set_message(format!("Parsing {}", path.display()));
    let document = parse_document(path)?;
    let source = document.metadata.filename.clone();

    let mut request = match scenario {
        Some(scenario_id) => IngestRequest::for_scenario(scenario_id, document.text, &source),
        None => IngestRequest::new(document.text, &source),
    };
    if let Some(title) = title.or(document.title) {
        request = request.with_title(title);
    }

    bar.set_message(format!("Embedding chunks of {}", source));
    let outcome = store.ingest_document(request).await;
    bar.finish_and_clear();
    let outcome = outcome?;

    println!(
        "✅ Ingested {} ({} bytes) into {} entries",
        source, document.metadata.size, outcome.chunks_created
    );
    println!("   Characters: {}", outcome.total_characters);
    if let Some(category) = outcome
        .entries
        .first()
        .and_then(|entry| entry.category.as_deref())
    {
        println!("   Category: {}", category);
    }

    Ok(())
}

/// Semantic search over active entries
#[inline]
pub async fn search_knowledge(
    config: &Config,
    query: &str,
    category: Option<&str>,
    limit: usize,
    use_index: bool,
) -> Result<()> {
    let store = open_store(config).await?;

    if use_index {
        let results = store.search_index(query, limit, category).await?;
        if results.is_empty() {
            println!("No matches above score {}.", config.retrieval.index_min_score);
            return Ok(());
        }

        println!("Index matches ({} total):", results.len());
        println!();
        for result in &results {
            println!(
                "🔍 {:.3}  {} (ID: {})",
                result.score, result.title, result.knowledge_id
            );
            println!("   {}", result.text_preview);
        }
        return Ok(());
    }

    let results = store
        .search_scored(query, limit, category, config.retrieval.min_similarity)
        .await?;
    if results.is_empty() {
        println!("No matching knowledge entries.");
        return Ok(());
    }

    println!("Matches ({} total):", results.len());
    println!();
    for scored in &results {
        println!("🔍 Score: {:.3}", scored.score);
        print_entry(&scored.entry, config.retrieval.preview_chars);
        println!();
    }

    Ok(())
}

/// Entries semantically close to an existing one
#[inline]
pub async fn show_related(config: &Config, id: i64, limit: usize) -> Result<()> {
    let store = open_store(config).await?;

    let Some(entry) = store.get(id).await? else {
        println!("Knowledge entry {} not found.", id);
        return Ok(());
    };

    let related = store.related_entries(id, limit).await?;
    println!("Related to: {} (ID: {})", entry.title, entry.id);
    println!();
    if related.is_empty() {
        println!("No related entries.");
    }
    for entry in &related {
        print_entry(entry, config.retrieval.preview_chars);
        println!();
    }

    Ok(())
}

/// List active entries, optionally filtered by category or tags
#[inline]
pub async fn list_entries(
    config: &Config,
    category: Option<&str>,
    tags: &[String],
    limit: usize,
) -> Result<()> {
    let store = open_store(config).await?;

    let entries = match category {
        Some(category) => store.by_category(category, limit).await?,
        None if !tags.is_empty() => store.by_tags(tags, limit).await?,
        None => store
            .list_active()
            .await?
            .into_iter()
            .take(limit)
            .collect(),
    };

    if entries.is_empty() {
        println!("No knowledge entries have been added yet.");
        println!("Use 'support-rag add <title> <content>' or 'support-rag ingest <file>'.");
        return Ok(());
    }

    println!("Knowledge Entries ({} shown):", entries.len());
    println!();
    for entry in &entries {
        print_entry(entry, config.retrieval.preview_chars);
        println!(
            "   Updated: {}",
            entry.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Soft-delete an entry, or bring a deactivated one back
#[inline]
pub async fn deactivate_entry(config: &Config, id: i64, restore: bool) -> Result<()> {
    let store = open_store(config).await?;

    let changed = if restore {
        store.reactivate(id).await?
    } else {
        store.deactivate(id).await?
    };

    match (changed, restore) {
        (true, true) => println!("✅ Reactivated knowledge entry {}", id),
        (true, false) => println!("✅ Deactivated knowledge entry {}", id),
        (false, _) => println!("Knowledge entry {} not found.", id),
    }

    Ok(())
}

/// Embed every active entry that has no embedding yet
#[inline]
pub async fn reembed_missing(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    let bar = spinner("{spinner} Embedding entries without vectors");
    let updated = store.bulk_update_embeddings().await;
    bar.finish_and_clear();

    println!("✅ Embedded {} entries", updated?);
    Ok(())
}

/// Re-embed all active entries and rebuild the vector index
#[inline]
pub async fn rebuild_index(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    let bar = spinner("{spinner} Rebuilding vector index");
    let indexed = store.rebuild_index().await;
    bar.finish_and_clear();

    println!(
        "✅ Rebuilt index with {} vectors ({} dimensions)",
        indexed?,
        store.index().dimension()
    );
    Ok(())
}

#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    println!("📊 Support RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();
    println!("📚 Knowledge Base:");
    println!("   Active Entries: {}", stats.total_entries);
    println!(
        "   With Embeddings: {} ({:.1}%)",
        stats.entries_with_embeddings, stats.embedding_coverage
    );
    println!("   Embedding Model: {}", stats.embedding_model);
    match store.embedder_health().await {
        Ok(()) => println!("   Embedding Backend: ✅ Ready"),
        Err(e) => {
            warn!("Embedding backend health check failed: {}", e);
            println!("   Embedding Backend: ❌ {}", e);
        }
    }

    if !stats.categories.is_empty() {
        println!();
        println!("🗂️  Categories:");
        for category in &stats.categories {
            println!("   {}: {}", category.name, category.count);
        }
    }

    println!();
    println!("🔍 Vector Index:");
    println!("   Vectors: {}", stats.index.total_vectors);
    println!("   Dimension: {}", stats.index.dimension);
    println!("   Size: {:.2} MB", stats.index.index_size_mb);

    if stats.entries_with_embeddings > 0 && stats.index.total_vectors == 0 {
        warn!("Vector index is empty while entries carry embeddings");
        println!("   ⚠️  Index is empty; run 'support-rag rebuild'");
    }

    Ok(())
}

#[inline]
pub fn list_scenarios(config: &Config) -> Result<()> {
    let catalog = ScenarioCatalog::from_config(config);

    println!("Scenarios:");
    println!();
    for profile in catalog.list() {
        println!("{} {} ({})", profile.icon, profile.name, profile.id);
        println!("   {}", profile.description);
        for query in &profile.sample_queries {
            println!("   • {}", query);
        }
        println!();
    }

    if let Some(prompts_dir) = catalog.prompts_dir() {
        println!("Prompt templates in {}:", prompts_dir.display());
        for status in catalog.template_status() {
            let mark = if status.exists { "✅" } else { "❌" };
            println!("   {} {}", mark, status.path);
        }
    }

    Ok(())
}

/// Print the prompt that would be sent to the model
#[inline]
pub async fn show_prompt(
    config: &Config,
    scenario_id: &str,
    message: &str,
    history: &[ChatTurn],
) -> Result<()> {
    let store = Arc::new(open_store(config).await?);
    let assembler = PromptAssembler::new(store, ScenarioCatalog::from_config(config));
    let scenario = assembler.catalog().resolve(scenario_id);

    let assembled = assembler
        .build_with_sources(&scenario, message, history, None)
        .await?;

    println!("{}", assembled.prompt);
    Ok(())
}

/// Answer a customer message with retrieval-augmented generation
#[inline]
pub async fn ask(
    config: &Config,
    scenario_id: &str,
    message: &str,
    history: &[ChatTurn],
    show_gaps: bool,
) -> Result<()> {
    let store = Arc::new(open_store(config).await?);
    let assembler = PromptAssembler::new(store, ScenarioCatalog::from_config(config));
    let generator = OllamaGenerator::new(&config.generation)
        .context("Failed to create Ollama generator")?;
    let assistant = SupportAssistant::new(assembler, Arc::new(generator));

    let bar = spinner("{spinner} Thinking");
    let reply = assistant.respond(scenario_id, message, history).await;
    bar.finish_and_clear();

    println!("{}", reply.content);
    println!();
    if reply.is_fallback() {
        println!("⚠️  The model was unavailable; this is the scenario's fallback reply.");
    } else {
        println!("Model: {} (~{} tokens)", reply.model, reply.token_estimate);
    }
    if !reply.sources.is_empty() {
        println!("Sources: {}", reply.sources.join(", "));
    }

    if show_gaps {
        let scenario = assistant.assembler().catalog().resolve(scenario_id);
        if let Scenario::BuiltIn(kind) = scenario {
            let mut conversation = history.to_vec();
            conversation.push(ChatTurn::user(message));
            let gaps = analyze_context_gaps(&conversation, kind);
            println!();
            println!("Context coverage: {:.0}%", gaps.context_coverage);
            if !gaps.mentioned_keywords.is_empty() {
                println!("Mentioned: {}", gaps.mentioned_keywords.join(", "));
            }
            println!("{}", gaps.suggested_context);
        }
    }

    Ok(())
}
