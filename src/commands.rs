use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Confirm, Input};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::RagError;
use crate::config::{Config, ProviderKind, prompt_api_key, run_interactive_config, show_config};
use crate::database::lancedb::VectorStore;
use crate::embeddings::build_providers;
use crate::indexer::{IngestOptions, IngestReport, Ingestor};
use crate::query::{Answer, DEFAULT_CHUNK_COUNT, QueryEngine};

/// Command-line overrides for an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestArgs {
    pub docs: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub force: bool,
    pub replace: bool,
    pub prune: bool,
}

/// Ingest the documents directory into the vector store
#[inline]
pub async fn ingest(config_dir: &Path, args: IngestArgs) -> Result<IngestReport> {
    let mut config = Config::load(config_dir).context("Failed to load configuration")?;

    if args.chunk_size.is_some() || args.chunk_overlap.is_some() {
        let chunk_size = args.chunk_size.unwrap_or(config.chunking.chunk_size);
        let chunk_overlap = args.chunk_overlap.unwrap_or(config.chunking.chunk_overlap);
        config.set_chunking(chunk_size, chunk_overlap)?;
    }

    let documents_dir = args
        .docs
        .unwrap_or_else(|| config.ingest.documents_dir.clone());

    let api_key = resolve_api_key(&config, true)?;
    let (embedder, _) = build_providers(&config, api_key)?;
    let store = VectorStore::new(&config)
        .await
        .context("Failed to open vector store")?;

    println!(
        "📂 Ingesting {} with {} ({} chars, {} overlap)",
        style(documents_dir.display()).cyan(),
        style(config.embedding_model()).cyan(),
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );

    let options = IngestOptions {
        documents_dir,
        recursive: config.ingest.recursive,
        force: args.force,
        replace: args.replace,
        prune: args.prune,
    };

    let mut ingestor = Ingestor::new(store, embedder, config.chunking.clone());
    let report = ingestor.sync(&options).await?;
    print_ingest_report(&report);

    Ok(report)
}

fn print_ingest_report(report: &IngestReport) {
    println!();
    if report.discovered == 0 {
        println!("📭 No supported documents found (pdf, docx, txt, md).");
        return;
    }

    println!("Documents found: {}", report.discovered);
    println!(
        "   {} Ingested: {} ({} chunks written)",
        style("✅").green(),
        report.ingested.len(),
        report.chunks_written
    );
    if !report.skipped.is_empty() {
        println!("   💤 Unchanged: {}", report.skipped.len());
    }
    if report.records_deleted > 0 {
        println!("   🗑️  Records removed: {}", report.records_deleted);
    }
    for source in &report.pruned {
        println!("   🗑️  Pruned: {}", source);
    }

    for failed in &report.failed {
        println!(
            "   {} {}: {}",
            style("❌").red(),
            failed.source,
            style(&failed.reason).dim()
        );
    }
    for stale in &report.stale {
        println!(
            "   {} {} keeps {} chunks from an earlier run (use --replace)",
            style("⚠️").yellow(),
            stale.source,
            stale.stale_chunks
        );
    }
    for source in &report.orphaned {
        println!(
            "   👻 {} is no longer on disk (use --prune)",
            style(source).dim()
        );
    }
}

/// Answer one question, or start an interactive session when none is given
#[inline]
pub async fn query(config_dir: &Path, question: Option<String>, chunks: Option<usize>) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    if let Some(chunks) = chunks {
        crate::config::settings::validate_chunk_count(chunks)?;
    }
    let chunks = chunks.unwrap_or(config.retrieval.default_chunks);

    let api_key = resolve_api_key(&config, true)?;
    let (embedder, generator) = build_providers(&config, api_key)?;
    let store = VectorStore::new(&config)
        .await
        .context("Failed to open vector store")?;
    let engine = QueryEngine::new(store, embedder, generator);

    match question {
        Some(question) => {
            let answer = engine.ask(&question, chunks).await?;
            print_answer(&answer);
            Ok(())
        }
        None => interactive_session(&engine, chunks).await,
    }
}

async fn interactive_session(engine: &QueryEngine, default_chunks: usize) -> Result<()> {
    println!("{}", style("💬 Ask questions about your documents. Type 'exit' to quit.").bold());

    loop {
        println!();
        let question: String = Input::new()
            .with_prompt("Question")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read question")?;

        if is_exit(&question) {
            break;
        }
        if question.trim().is_empty() {
            continue;
        }

        let chunks_input: String = Input::new()
            .with_prompt("Number of chunks")
            .default(default_chunks.to_string())
            .interact_text()
            .context("Failed to read chunk count")?;
        let chunks = parse_chunk_count(&chunks_input, default_chunks);

        match engine.ask(&question, chunks).await {
            Ok(answer) => print_answer(&answer),
            Err(RagError::EmptyStore) => return Err(RagError::EmptyStore.into()),
            Err(e) => {
                warn!("Query failed: {}", e);
                eprintln!("{} {}", style("❌").red(), e);
            }
        }
    }

    Ok(())
}

fn is_exit(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("exit")
}

/// Positive integer from the prompt, otherwise the default
fn parse_chunk_count(input: &str, default: usize) -> usize {
    let fallback = if default > 0 {
        default
    } else {
        DEFAULT_CHUNK_COUNT
    };

    match input.trim().parse::<usize>() {
        Ok(chunks) if chunks > 0 => chunks,
        _ => {
            if !input.trim().is_empty() {
                println!("Invalid number, using the default of {}", fallback);
            }
            fallback
        }
    }
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", style("Answer:").bold().green());
    println!("{}", answer.text);
    println!();
    println!("{}", style("Sources:").bold());
    for location in answer.source_locations() {
        println!("   📄 {}", location);
    }
}

/// Show provider health and what the vector store holds
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📊 doc-rag Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Provider Status ({}):", config.provider);
    let api_key = resolve_api_key(&config, false)?;
    match build_providers(&config, api_key) {
        Ok((embedder, generator)) => match embedder.health_check() {
            Ok(()) => {
                println!("   ✅ Reachable");
                println!("   📋 Embedding model: {}", embedder.model_name());
                println!("   💬 Generation model: {}", generator.model_name());
            }
            Err(e) => println!("   ⚠️  Unhealthy - {}", e),
        },
        Err(e) => println!("   ❌ Not configured - {}", e),
    }

    println!();
    println!("🔍 Vector Database Status:");
    println!("   📁 Path: {}", config.vector_database_path().display());
    match VectorStore::new(&config).await {
        Ok(store) => {
            let count = store.count_embeddings().await?;
            println!("   ✅ LanceDB: Connected");
            println!("   📄 Chunks stored: {}", count);
            if let Some(dimension) = store.vector_dimension() {
                println!("   🔢 Vector dimension: {}", dimension);
            }

            let sources = store.list_sources().await?;
            if sources.is_empty() {
                println!("   📭 No documents ingested yet");
            } else {
                println!();
                println!("📚 Indexed Documents ({} total):", sources.len());
                for source in &sources {
                    println!("   • {} ({} chunks)", source.source, source.chunk_count);
                }
            }
        }
        Err(e) => println!("   ❌ LanceDB: Failed to open - {}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'doc-rag ingest' to index the documents directory");
    println!("   • Use 'doc-rag query' to ask questions");

    Ok(())
}

/// Drop every stored chunk
#[inline]
pub async fn reset(config_dir: &Path, yes: bool) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    if !yes {
        if !console::user_attended() {
            bail!("Refusing to reset the vector store without --yes");
        }
        let confirmed = Confirm::new()
            .with_prompt("Delete every stored chunk? This cannot be undone.")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    let mut store = VectorStore::new(&config)
        .await
        .context("Failed to open vector store")?;
    let removed = store.count_embeddings().await?;
    store.reset().await?;

    info!("Vector store reset, {} records removed", removed);
    println!("🗑️  Removed {} chunks from the vector store", removed);
    Ok(())
}

/// Show or interactively edit the configuration
#[inline]
pub fn configure(config_dir: &Path, show: bool) -> Result<()> {
    if show {
        let config = Config::load(config_dir).context("Failed to load configuration")?;
        show_config(&config);
        Ok(())
    } else {
        run_interactive_config(config_dir)
    }
}

/// Gemini key from config or environment, prompting on a terminal when allowed
fn resolve_api_key(config: &Config, allow_prompt: bool) -> Result<Option<String>> {
    if config.provider != ProviderKind::Gemini {
        return Ok(None);
    }
    if let Some(key) = config.gemini.resolve_api_key() {
        return Ok(Some(key));
    }
    if allow_prompt && console::user_attended_stderr() {
        return prompt_api_key().map(Some);
    }
    Ok(None)
}
