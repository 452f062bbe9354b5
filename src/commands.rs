use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chain::RetrievalChain;
use crate::config::Config;
use crate::database::{LanceIndex, VectorIndex};
use crate::embeddings::{Embedder, OllamaClient, OllamaEmbedder};
use crate::generation::{Generator, OllamaGenerator};
use crate::indexer::IndexingPipeline;
use crate::server::AnswerServer;

/// Command-line overrides for an indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOverrides {
    pub data_path: Option<PathBuf>,
    pub index_name: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

impl IndexOverrides {
    /// Apply the overrides on top of `config` and re-validate it
    #[inline]
    pub fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(data_path) = self.data_path {
            config.documents.path = data_path;
        }
        if let Some(index_name) = self.index_name {
            config.index.name = index_name;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = chunk_overlap;
        }
        config
            .validate()
            .context("Invalid indexing options")?;
        Ok(())
    }
}

fn embedder_for(config: &Config) -> Result<OllamaEmbedder> {
    let client = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;
    Ok(OllamaEmbedder::new(client, &config.embedding))
}

async fn open_index(config: &Config) -> Result<LanceIndex> {
    let path = config.vector_database_path();
    LanceIndex::open(&path)
        .await
        .with_context(|| format!("Failed to open vector database at {}", path.display()))
}

/// Build the retrieval chain described by `config`
#[inline]
pub async fn build_chain(config: &Config) -> Result<RetrievalChain> {
    let embedder: Arc<dyn Embedder> = Arc::new(embedder_for(config)?);
    let index: Arc<dyn VectorIndex> = Arc::new(open_index(config).await?);
    let generator: Arc<dyn Generator> = Arc::new(
        OllamaGenerator::new(&config.ollama, &config.generation)
            .context("Failed to initialize generator")?,
    );

    Ok(
        RetrievalChain::new(embedder, index, generator, config.index.name.clone())
            .with_top_k(config.retrieval.k)
            .with_params(config.generation.params()),
    )
}

/// Warn about models the Ollama server does not have
fn check_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;
    for model in [&config.embedding.model, &config.generation.model] {
        if let Err(e) = client.health_check(model) {
            warn!("Ollama is not ready for {}: {:#}", model, e);
        }
    }
    Ok(())
}

/// Index the configured document directory
#[inline]
pub async fn index_documents(overrides: IndexOverrides) -> Result<()> {
    let mut config = Config::load_default().context("Failed to load configuration")?;
    overrides.apply(&mut config)?;

    let embedder = embedder_for(&config)?;
    let client = OllamaClient::new(&config.ollama)?;
    if let Err(e) = client.health_check(&config.embedding.model) {
        error!("Embedding model unavailable: {:#}", e);
        println!(
            "Error: Cannot use embedding model {} at {}",
            config.embedding.model,
            client.base_url()
        );
        println!("Use 'docs-rag config' to update connection settings.");
        return Err(e);
    }

    let index = open_index(&config).await?;
    let pipeline = IndexingPipeline::new(Arc::new(embedder), Arc::new(index))
        .with_extensions(config.documents.extensions.clone())
        .with_batch_size(config.ollama.batch_size as usize);

    info!(
        "Indexing {} into {}",
        config.documents.path.display(),
        config.index.name
    );
    let summary = pipeline
        .build_index(
            &config.documents.path,
            &config.index.name,
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        )
        .await
        .context("Indexing failed")?;

    println!("Indexed {} into '{}'", config.documents.path.display(), summary.index_name);
    println!("  Pages loaded: {}", summary.documents_loaded);
    println!("  Chunks indexed: {}", summary.chunks_indexed);
    println!("  Records in index: {}", summary.index_size);

    Ok(())
}

/// Answer a single question and print the answer
#[inline]
pub async fn ask(question: &str) -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let chain = build_chain(&config).await?;

    let answer = chain.answer(question).await?;
    println!("{}", answer);
    Ok(())
}

/// Answer questions from stdin until EOF
#[inline]
pub async fn serve() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    check_models(&config)?;

    let chain = build_chain(&config).await?;
    AnswerServer::new(Arc::new(chain)).serve_stdio().await
}

/// Show configuration, model availability and index contents
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    println!("📊 Docs-RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            for (role, model) in [
                ("Embedding", &config.embedding.model),
                ("Generation", &config.generation.model),
            ] {
                match client.health_check(model) {
                    Ok(()) => println!("   ✅ {} model: {}", role, model),
                    Err(e) => println!("   ⚠️  {} model {} unavailable - {:#}", role, model, e),
                }
            }
        }
        Err(e) => println!("   ❌ Ollama: Failed to connect - {}", e),
    }

    println!("🔍 Vector Database Status:");
    match open_index(&config).await {
        Ok(index) => {
            println!("   ✅ LanceDB: {}", index.path().display());
            match index.index_names().await {
                Ok(names) if names.is_empty() => {
                    println!("   No indexes yet. Use 'docs-rag index' to build one.");
                }
                Ok(names) => {
                    for name in names {
                        match index.count(&name).await {
                            Ok(count) => println!("   📚 {}: {} records", name, count),
                            Err(e) => println!("   ❌ {}: {}", name, e),
                        }
                    }
                }
                Err(e) => println!("   ❌ Failed to list indexes - {}", e),
            }
        }
        Err(e) => println!("   ❌ LanceDB: {:#}", e),
    }

    println!();
    println!("⚙️  Active index: {} (top {})", config.index.name, config.retrieval.k);
    println!("📁 Documents: {}", config.documents.path.display());

    Ok(())
}
