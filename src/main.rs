use clap::{Parser, Subcommand};
use doc_rag::Result;
use doc_rag::commands::{IngestArgs, configure, ingest, query, reset, show_status};
use doc_rag::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-rag")]
#[command(about = "Ask questions about local PDF, DOCX and text documents")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector store
    #[arg(long, global = true, env = "DOC_RAG_HOME")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, chunk and embed the documents directory
    Ingest {
        /// Documents directory, overrides the configured one
        #[arg(long)]
        docs: Option<PathBuf>,
        /// Maximum characters per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Characters shared between adjacent chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// Re-embed documents even if they are unchanged
        #[arg(long)]
        force: bool,
        /// Remove a document's old chunks before storing new ones
        #[arg(long)]
        replace: bool,
        /// Remove chunks of documents that were deleted from disk
        #[arg(long)]
        prune: bool,
    },
    /// Ask a question; starts an interactive session when none is given
    Query {
        question: Option<String>,
        /// Number of chunks used as context
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Show provider and vector store status
    Status,
    /// Delete everything in the vector store
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Configure providers, models and chunking
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_dir().map_err(|e| doc_rag::RagError::Config(e.to_string()))?,
    };

    match cli.command {
        Commands::Ingest {
            docs,
            chunk_size,
            chunk_overlap,
            force,
            replace,
            prune,
        } => {
            let report = ingest(
                &config_dir,
                IngestArgs {
                    docs,
                    chunk_size,
                    chunk_overlap,
                    force,
                    replace,
                    prune,
                },
            )
            .await?;
            if report.has_failures() {
                std::process::exit(2);
            }
        }
        Commands::Query { question, k } => {
            query(&config_dir, question, k).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
        Commands::Reset { yes } => {
            reset(&config_dir, yes).await?;
        }
        Commands::Config { show } => {
            configure(&config_dir, show)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn ingest_defaults() {
        let cli = Cli::try_parse_from(["doc-rag", "ingest"]).expect("should parse");

        if let Commands::Ingest {
            docs,
            chunk_size,
            force,
            replace,
            prune,
            ..
        } = cli.command
        {
            assert_eq!(docs, None);
            assert_eq!(chunk_size, None);
            assert!(!force && !replace && !prune);
        } else {
            panic!("expected ingest command");
        }
    }

    #[test]
    fn ingest_with_overrides() {
        let cli = Cli::try_parse_from([
            "doc-rag",
            "ingest",
            "--docs",
            "papers",
            "--chunk-size",
            "500",
            "--chunk-overlap",
            "50",
            "--replace",
            "--prune",
        ])
        .expect("should parse");

        if let Commands::Ingest {
            docs,
            chunk_size,
            chunk_overlap,
            replace,
            prune,
            force,
        } = cli.command
        {
            assert_eq!(docs, Some(PathBuf::from("papers")));
            assert_eq!(chunk_size, Some(500));
            assert_eq!(chunk_overlap, Some(50));
            assert!(replace && prune && !force);
        } else {
            panic!("expected ingest command");
        }
    }

    #[test]
    fn query_with_question_and_k() {
        let cli = Cli::try_parse_from(["doc-rag", "query", "What is RAG?", "-k", "3"])
            .expect("should parse");

        if let Commands::Query { question, k } = cli.command {
            assert_eq!(question.as_deref(), Some("What is RAG?"));
            assert_eq!(k, Some(3));
        } else {
            panic!("expected query command");
        }
    }

    #[test]
    fn query_without_question_is_interactive() {
        let cli = Cli::try_parse_from(["doc-rag", "query"]).expect("should parse");

        if let Commands::Query { question, k } = cli.command {
            assert_eq!(question, None);
            assert_eq!(k, None);
        } else {
            panic!("expected query command");
        }
    }

    #[test]
    fn global_data_dir_after_subcommand() {
        let cli = Cli::try_parse_from(["doc-rag", "status", "--data-dir", "/tmp/rag"])
            .expect("should parse");

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/rag")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn reset_and_config_flags() {
        let cli = Cli::try_parse_from(["doc-rag", "reset", "--yes"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Reset { yes: true }));

        let cli = Cli::try_parse_from(["doc-rag", "config", "--show"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["doc-rag", "crawl"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["doc-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
