
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, EmbeddingConfig, EmbeddingStrategy, GenerationConfig};

const STRATEGIES: [EmbeddingStrategy; 2] = [EmbeddingStrategy::Hashed, EmbeddingStrategy::Ollama];

#[inline]
pub fn run_interactive_config(mut config: Config) -> Result<()> {
    eprintln!("{}", style("🔧 Support RAG Configuration Setup").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Configuration").bold().yellow());
    eprintln!("Choose how knowledge entries are turned into vectors.");
    eprintln!(
        "{}",
        style("Changing the strategy or dimension requires `support-rag rebuild`.").dim()
    );
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Generation Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used to answer questions.");
    eprintln!();

    configure_generation(&mut config.generation)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(
        &config.generation.protocol,
        &config.generation.host,
        config.generation.port,
    ) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("Answers will use the scenario fallback message until Ollama is reachable.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  {}", style(describe_embedding(&config.embedding)).cyan());

    eprintln!();
    eprintln!("{}", style("Chunking Settings:").bold().yellow());
    eprintln!(
        "  Max Chunk Size: {}",
        style(config.chunking.max_chunk_size).cyan()
    );
    eprintln!("  Overlap: {}", style(config.chunking.overlap).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!(
        "  Min Similarity: {}",
        style(config.retrieval.min_similarity).cyan()
    );
    eprintln!(
        "  Index Min Score: {}",
        style(config.retrieval.index_min_score).cyan()
    );
    eprintln!(
        "  Prompt Top-K: {}",
        style(config.retrieval.prompt_top_k).cyan()
    );
    eprintln!(
        "  History Window: {}",
        style(config.retrieval.history_window).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Generation Settings:").bold().yellow());
    match config.generation.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    eprintln!(
        "  Timeout: {}s",
        style(config.generation.timeout_secs).cyan()
    );

    if !config.scenarios.is_empty() {
        eprintln!();
        eprintln!("{}", style("Custom Scenarios:").bold().yellow());
        for scenario in &config.scenarios {
            eprintln!("  {} ({})", style(&scenario.name).cyan(), scenario.id);
        }
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn describe_embedding(embedding: &EmbeddingConfig) -> String {
    match embedding.strategy {
        EmbeddingStrategy::Hashed => format!(
            "hashed features, {} dimensions",
            embedding.dimension
        ),
        EmbeddingStrategy::Ollama => format!(
            "ollama model {} at {}://{}:{}, {} dimensions",
            embedding.model, embedding.protocol, embedding.host, embedding.port, embedding.dimension
        ),
    }
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let labels = ["hashed (no external model)", "ollama (pretrained encoder)"];
    let default_index = STRATEGIES
        .iter()
        .position(|&s| s == embedding.strategy)
        .unwrap_or(0);

    let strategy_index = Select::new()
        .with_prompt("Embedding strategy")
        .default(default_index)
        .items(&labels)
        .interact()?;
    let strategy = STRATEGIES[strategy_index];

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .validate_with(|input: &u32| -> Result<(), String> {
            let candidate = EmbeddingConfig {
                strategy,
                dimension: *input,
                ..embedding.clone()
            };
            candidate.validate().map_err(|e| e.to_string())
        })
        .interact_text()?;

    if strategy == EmbeddingStrategy::Ollama {
        let host: String = Input::new()
            .with_prompt("Ollama host")
            .default(embedding.host.clone())
            .interact_text()?;

        let port: u16 = Input::new()
            .with_prompt("Ollama port")
            .default(embedding.port)
            .validate_with(|input: &u16| -> Result<(), &str> {
                if *input == 0 {
                    Err("Port must be greater than 0")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;

        let model: String = Input::new()
            .with_prompt("Embedding model")
            .default(embedding.model.clone())
            .interact_text()?;

        embedding.host = host;
        embedding.port = port;
        embedding.set_model(model)?;
    }

    embedding.strategy = strategy;
    embedding.set_dimension(dimension)?;

    Ok(())
}

fn configure_generation(generation: &mut GenerationConfig) -> Result<()> {
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(generation.host.clone())
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(generation.port)
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Generation model")
        .default(generation.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    generation.set_host(host)?;
    generation.set_port(port)?;
    generation.set_model(model)?;

    Ok(())
}

fn test_ollama_connection(protocol: &str, host: &str, port: u16) -> bool {
    let url = format!("{}://{}:{}/api/version", protocol, host, port);

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
