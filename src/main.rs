use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use support_rag::commands::{
    add_entry, ask, deactivate_entry, ingest_file, list_entries, list_scenarios, load_history,
    rebuild_index, reembed_missing, search_knowledge, show_prompt, show_related, show_stats,
};
use support_rag::config::{BASE_DIR_ENV, load_config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "support-rag")]
#[command(about = "Local knowledge retrieval and prompt assembly for a support assistant")]
#[command(version)]
struct Cli {
    /// Directory holding the configuration, database and vector index
    #[arg(long, global = true, env = BASE_DIR_ENV)]
    base_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure embedding and generation settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a knowledge entry
    Add {
        title: String,
        content: String,
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Split a document (.txt, .md, .html, .json) into knowledge entries
    Ingest {
        path: PathBuf,
        /// File the document as business context of this scenario
        #[arg(long)]
        scenario: Option<String>,
        /// Title shared by every chunk
        #[arg(long)]
        title: Option<String>,
    },
    /// Semantic search over knowledge entries
    Search {
        query: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Search the vector index and print previews
        #[arg(long)]
        index: bool,
    },
    /// Show entries related to an existing one
    Related {
        id: i64,
        #[arg(long, default_value_t = 3)]
        limit: usize,
    },
    /// List active knowledge entries
    List {
        #[arg(long, conflicts_with = "tags")]
        category: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Deactivate a knowledge entry
    Deactivate {
        id: i64,
        /// Reactivate instead
        #[arg(long)]
        restore: bool,
    },
    /// Embed entries that have no embedding yet
    Reembed,
    /// Re-embed every entry and rebuild the vector index
    Rebuild,
    /// Show knowledge base and index statistics
    Stats,
    /// List the available scenarios
    Scenarios,
    /// Print the assembled prompt without calling a model
    Prompt {
        scenario: String,
        message: String,
        /// JSON file with earlier turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Answer a customer message
    Ask {
        scenario: String,
        message: String,
        #[arg(long)]
        history: Option<PathBuf>,
        /// Also report which topics lack business context
        #[arg(long)]
        gaps: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                run_interactive_config(config)?;
            }
        }
        Commands::Add {
            title,
            content,
            category,
            tags,
            source,
        } => {
            add_entry(&config, title, content, category, tags, source).await?;
        }
        Commands::Ingest {
            path,
            scenario,
            title,
        } => {
            ingest_file(&config, &path, scenario.as_deref(), title).await?;
        }
        Commands::Search {
            query,
            category,
            limit,
            index,
        } => {
            search_knowledge(&config, &query, category.as_deref(), limit, index).await?;
        }
        Commands::Related { id, limit } => {
            show_related(&config, id, limit).await?;
        }
        Commands::List {
            category,
            tags,
            limit,
        } => {
            list_entries(&config, category.as_deref(), &tags, limit).await?;
        }
        Commands::Deactivate { id, restore } => {
            deactivate_entry(&config, id, restore).await?;
        }
        Commands::Reembed => {
            reembed_missing(&config).await?;
        }
        Commands::Rebuild => {
            rebuild_index(&config).await?;
        }
        Commands::Stats => {
            show_stats(&config).await?;
        }
        Commands::Scenarios => {
            list_scenarios(&config)?;
        }
        Commands::Prompt {
            scenario,
            message,
            history,
        } => {
            let history = load_history(history.as_deref())?;
            show_prompt(&config, &scenario, &message, &history).await?;
        }
        Commands::Ask {
            scenario,
            message,
            history,
            gaps,
        } => {
            let history = load_history(history.as_deref())?;
            ask(&config, &scenario, &message, &history, gaps).await?;
        }
    }

    Ok(())
}
