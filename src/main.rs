use anyhow::Result;
use clap::{Parser, Subcommand};
use docs_rag::commands::{IndexOverrides, ask, index_documents, serve, show_status};
use docs_rag::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Retrieval-augmented question answering over a local document corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, models and index settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load, chunk and embed the document directory into the vector index
    Index {
        /// Directory of documents to index
        #[arg(long)]
        data_path: Option<PathBuf>,
        /// Name of the index to populate
        #[arg(long)]
        index_name: Option<String>,
        /// Maximum chunk length in characters
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Characters shared by consecutive chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },
    /// Answer a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Answer JSON requests read line by line from stdin
    Serve,
    /// Show model availability and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Index {
            data_path,
            index_name,
            chunk_size,
            chunk_overlap,
        } => {
            index_documents(IndexOverrides {
                data_path,
                index_name,
                chunk_size,
                chunk_overlap,
            })
            .await?;
        }
        Commands::Ask { question } => {
            ask(&question).await?;
        }
        Commands::Serve => {
            serve().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn index_command_defaults() {
        let cli = Cli::try_parse_from(["docs-rag", "index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index {
                data_path,
                index_name,
                chunk_size,
                chunk_overlap,
            } = parsed.command
            {
                assert_eq!(data_path, None);
                assert_eq!(index_name, None);
                assert_eq!(chunk_size, None);
                assert_eq!(chunk_overlap, None);
            } else {
                panic!("expected index command");
            }
        }
    }

    #[test]
    fn index_command_with_options() {
        let cli = Cli::try_parse_from([
            "docs-rag",
            "index",
            "--data-path",
            "corpus",
            "--index-name",
            "medical",
            "--chunk-size",
            "800",
            "--chunk-overlap",
            "80",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index {
                data_path,
                index_name,
                chunk_size,
                chunk_overlap,
            } = parsed.command
            {
                assert_eq!(data_path, Some(PathBuf::from("corpus")));
                assert_eq!(index_name, Some("medical".to_string()));
                assert_eq!(chunk_size, Some(800));
                assert_eq!(chunk_overlap, Some(80));
            } else {
                panic!("expected index command");
            }
        }
    }

    #[test]
    fn ask_command_takes_question() {
        let cli = Cli::try_parse_from(["docs-rag", "ask", "What dosage was prescribed?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { question } = parsed.command {
                assert_eq!(question, "What dosage was prescribed?");
            } else {
                panic!("expected ask command");
            }
        }
    }

    #[test]
    fn ask_requires_question() {
        let cli = Cli::try_parse_from(["docs-rag", "ask"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn serve_command() {
        let cli = Cli::try_parse_from(["docs-rag", "serve"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Serve));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["docs-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_chunk_size_is_rejected() {
        let cli = Cli::try_parse_from(["docs-rag", "index", "--chunk-size", "large"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["docs-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["docs-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
