
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

use super::{ChatConfig, Config, ConfigError, EmbeddingConfig, QdrantConfig, RagConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Notes RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Embedding Service").bold().yellow());
    eprintln!("OpenAI-compatible endpoint used to embed note chunks and questions.");
    eprintln!();
    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Chat Completion Service").bold().yellow());
    eprintln!("OpenAI-compatible endpoint used to generate answers.");
    eprintln!();
    configure_chat(&mut config.chat)?;

    eprintln!();
    eprintln!("{}", style("Qdrant Vector Store").bold().yellow());
    eprintln!();
    configure_qdrant(&mut config.qdrant)?;

    eprintln!();
    eprintln!("{}", style("Retrieval").bold().yellow());
    eprintln!();
    configure_rag(&mut config.rag)?;

    eprintln!();
    eprintln!("{}", style("Testing Qdrant connection...").yellow());

    if test_qdrant_connection(&config.qdrant) {
        eprintln!("{}", style("✓ Qdrant connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Qdrant").yellow()
        );
        eprintln!("You can continue, but make sure Qdrant is running before indexing.");
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
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.embedding.base_url).cyan());
    eprintln!("  API Key: {}", style(mask_secret(&config.embedding.api_key)).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimensions: {}", style(config.embedding.dimensions).cyan());

    eprintln!();
    eprintln!("{}", style("Chat:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.chat.base_url).cyan());
    eprintln!("  API Key: {}", style(mask_secret(&config.chat.api_key)).cyan());
    eprintln!("  Model: {}", style(&config.chat.model).cyan());
    eprintln!("  Temperature: {}", style(config.chat.temperature).cyan());
    eprintln!("  Max Tokens: {}", style(config.chat.max_tokens).cyan());

    eprintln!();
    eprintln!("{}", style("Qdrant:").bold().yellow());
    eprintln!("  URL: {}", style(&config.qdrant.url).cyan());
    eprintln!(
        "  API Key: {}",
        style(mask_secret(config.qdrant.api_key.as_deref().unwrap_or_default())).cyan()
    );
    eprintln!("  Collection: {}", style(&config.qdrant.collection).cyan());
    eprintln!("  Distance: {}", style(&config.qdrant.distance).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Top K: {}", style(config.rag.top_k).cyan());
    eprintln!("  Chunk Size: {}", style(config.rag.chunk_size).cyan());
    eprintln!(
        "  Embedding Concurrency: {}",
        style(config.rag.embedding_concurrency).cyan()
    );

    eprintln!();
    eprintln!("{}", style("HTTP:").bold().yellow());
    eprintln!("  Timeout: {}s", style(config.http.timeout_seconds).cyan());
    eprintln!(
        "  Chat Timeout: {}s",
        style(config.http.chat_timeout_seconds).cyan()
    );
    eprintln!("  Retry Attempts: {}", style(config.http.retry_attempts).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Database: {}", style(config.database_path().display()).dim());

    Ok(())
}

/// Keeps the last four characters of a secret visible.
pub(crate) fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return "(not set)".to_string();
    }
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn prompt_url(prompt: &str, current: &str) -> Result<String> {
    let url: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|_| ConfigError::InvalidUrl(input.clone()))
        })
        .interact_text()?;
    Ok(url.trim_end_matches('/').to_string())
}

fn prompt_model(prompt: &str, current: &str) -> Result<String> {
    let model: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(model)
}

/// An empty answer keeps the current key.
fn prompt_secret(prompt: &str, current: &str) -> Result<String> {
    let entered = Password::new()
        .with_prompt(format!("{} [{}]", prompt, mask_secret(current)))
        .allow_empty_password(true)
        .interact()?;
    Ok(if entered.is_empty() {
        current.to_string()
    } else {
        entered
    })
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    embedding.base_url = prompt_url("Embedding base URL", &embedding.base_url)?;
    embedding.api_key = prompt_secret("Embedding API key", &embedding.api_key)?;
    let model = prompt_model("Embedding model", &embedding.model)?;

    let dimensions: u32 = Input::new()
        .with_prompt("Embedding dimensions")
        .default(embedding.dimensions)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimensions must be between 64 and 4096")
            }
        })
        .interact_text()?;

    embedding.set_model(model)?;
    embedding.set_dimensions(dimensions)?;
    Ok(())
}

fn configure_chat(chat: &mut ChatConfig) -> Result<()> {
    chat.base_url = prompt_url("Chat base URL", &chat.base_url)?;
    chat.api_key = prompt_secret("Chat API key", &chat.api_key)?;
    chat.model = prompt_model("Chat model", &chat.model)?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(chat.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    chat.set_temperature(temperature)?;
    Ok(())
}

fn configure_qdrant(qdrant: &mut QdrantConfig) -> Result<()> {
    qdrant.url = prompt_url("Qdrant URL", &qdrant.url)?;
    let api_key = prompt_secret("Qdrant API key", qdrant.api_key.as_deref().unwrap_or_default())?;
    qdrant.api_key = (!api_key.is_empty()).then_some(api_key);

    let collection: String = Input::new()
        .with_prompt("Collection name")
        .default(qdrant.collection.clone())
        .interact_text()?;
    qdrant.collection = collection;

    let distances = QdrantConfig::supported_distances();
    let default_index = distances
        .iter()
        .position(|&d| d == qdrant.distance)
        .unwrap_or(0);
    let distance_index = Select::new()
        .with_prompt("Similarity metric")
        .default(default_index)
        .items(distances)
        .interact()?;
    qdrant.set_distance(distances[distance_index].to_string())?;

    Ok(())
}

fn configure_rag(rag: &mut RagConfig) -> Result<()> {
    rag.top_k = Input::new()
        .with_prompt("Default number of retrieved chunks (top_k)")
        .default(rag.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("top_k must be between 1 and 100")
            }
        })
        .interact_text()?;

    rag.embedding_concurrency = Input::new()
        .with_prompt("Concurrent embedding requests")
        .default(rag.embedding_concurrency)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=32).contains(input) {
                Ok(())
            } else {
                Err("Concurrency must be between 1 and 32")
            }
        })
        .interact_text()?;

    Ok(())
}

fn test_qdrant_connection(qdrant: &QdrantConfig) -> bool {
    let url = format!("{}/collections", qdrant.url.trim_end_matches('/'));

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    let mut request = agent.get(&url);
    if let Some(key) = &qdrant.api_key {
        request = request.header("api-key", key);
    }

    match request.call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => code == 401 || code == 403,
        Err(_) => false,
    }
}
