
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::{Path, PathBuf};

use super::{Config, ConfigError, GeminiConfig, OllamaConfig, ProviderKind};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 doc-rag Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    let providers = &["gemini", "ollama"];
    let default_index = match config.provider {
        ProviderKind::Gemini => 0,
        ProviderKind::Ollama => 1,
    };
    let provider_index = Select::new()
        .with_prompt("Embedding and generation provider")
        .default(default_index)
        .items(providers)
        .interact()?;
    config.provider = if provider_index == 0 {
        ProviderKind::Gemini
    } else {
        ProviderKind::Ollama
    };

    eprintln!();
    match config.provider {
        ProviderKind::Gemini => {
            eprintln!("{}", style("Gemini Configuration").bold().yellow());
            eprintln!("Configure the Google Generative Language API.");
            eprintln!();
            configure_gemini(&mut config.gemini)?;
        }
        ProviderKind::Ollama => {
            eprintln!("{}", style("Ollama Configuration").bold().yellow());
            eprintln!("Configure your local Ollama instance.");
            eprintln!();
            configure_ollama(&mut config.ollama)?;

            eprintln!();
            eprintln!("{}", style("Testing configuration...").yellow());
            if test_ollama_connection(&config.ollama) {
                eprintln!("{}", style("✓ Ollama connection successful!").green());
            } else {
                eprintln!(
                    "{}",
                    style("⚠ Warning: Could not connect to Ollama").yellow()
                );
                eprintln!("You can continue, but make sure Ollama is running before ingesting.");
            }
        }
    }

    eprintln!();
    eprintln!("{}", style("Documents & Chunking").bold().yellow());
    configure_ingestion(&mut config)?;

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
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("  Provider: {}", style(config.provider).cyan());
    eprintln!();

    eprintln!("{}", style("Gemini Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.gemini.base_url).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.gemini.embedding_model).cyan()
    );
    eprintln!(
        "  Generation Model: {}",
        style(&config.gemini.generation_model).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.gemini.batch_size).cyan());
    let key_state = match (&config.gemini.api_key, config.gemini.resolve_api_key()) {
        (Some(_), _) => style("stored in config file").green(),
        (None, Some(_)) => style("from environment").green(),
        (None, None) => style("not set").red(),
    };
    eprintln!("  API Key: {}", key_state);

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Embedding Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Generation Model: {}",
        style(&config.ollama.generation_model).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());

    eprintln!();
    eprintln!("{}", style("Ingestion:").bold().yellow());
    eprintln!(
        "  Documents Directory: {}",
        style(config.ingest.documents_dir.display()).cyan()
    );
    eprintln!("  Recursive: {}", style(config.ingest.recursive).cyan());
    eprintln!(
        "  Chunk Size: {} characters",
        style(config.chunking.chunk_size).cyan()
    );
    eprintln!(
        "  Chunk Overlap: {} characters",
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!(
        "  Default Chunks Per Query: {}",
        style(config.retrieval.default_chunks).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!(
        "Vector store: {}",
        style(config.vector_database_path().display()).dim()
    );
}

/// Ask for the Gemini API key without echoing it
#[inline]
pub fn prompt_api_key() -> Result<String> {
    let key = Password::new()
        .with_prompt("Enter your Google API Key")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("API key cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()
        .context("Failed to read API key")?;
    Ok(key.trim().to_string())
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config::new(config_dir)
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_gemini(gemini: &mut GeminiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(gemini.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            url::Url::parse(input).map_err(|_| ConfigError::InvalidUrl(input.clone()))?;
            Ok(())
        })
        .interact_text()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(gemini.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let generation_model: String = Input::new()
        .with_prompt("Generation model")
        .default(gemini.generation_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(gemini.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 || *input > 100 {
                Err("Batch size must be between 1 and 100")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    gemini.set_base_url(base_url)?;
    gemini.set_embedding_model(embedding_model)?;
    gemini.set_generation_model(generation_model)?;
    gemini.set_batch_size(batch_size)?;

    if Confirm::new()
        .with_prompt("Store an API key in the config file? (otherwise GOOGLE_API_KEY is used)")
        .default(gemini.api_key.is_some())
        .interact()?
    {
        gemini.set_api_key(prompt_api_key()?)?;
    } else {
        gemini.api_key = None;
    }

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
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
        .default(ollama.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let generation_model: String = Input::new()
        .with_prompt("Generation model")
        .default(ollama.generation_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_generation_model(generation_model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_ingestion(config: &mut Config) -> Result<()> {
    let documents_dir: String = Input::new()
        .with_prompt("Documents directory")
        .default(config.ingest.documents_dir.display().to_string())
        .validate_with(non_empty)
        .interact_text()?;

    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(config.chunking.chunk_size)
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(config.chunking.chunk_overlap)
        .interact_text()?;

    let default_chunks: usize = Input::new()
        .with_prompt("Chunks per query")
        .default(config.retrieval.default_chunks)
        .interact_text()?;

    config.ingest.documents_dir = PathBuf::from(documents_dir);
    config.set_chunking(chunk_size, chunk_overlap)?;
    config.set_default_chunks(default_chunks)?;

    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

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
