//! Offline index build pipeline.
//!
//! ```text
//! discover → load → chunk → enrich → init embeddings → embed → self-test → persist → verify
//! ```
//!
//! Each step logs its outcome. Unreadable documents are skipped; everything
//! else that fails aborts the build, leaving any previous index untouched.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::embedding::{embed_batched, initialize_embeddings};
use crate::error::SopError;
use crate::index_store;
use crate::loader;
use crate::manifest::{BuildSettings, Manifest, Performance};
use crate::retriever::Retriever;
use sop_agent_core::chunk::TextSplitter;
use sop_agent_core::embedding::EmbeddingProvider;
use sop_agent_core::index::VectorIndex;
use sop_agent_core::models::{Chunk, ChunkPosition, SourceDocument};

/// Representative caller questions run against every fresh index.
pub const SELF_TEST_QUERIES: &[&str] = &[
    "How should I greet a caller?",
    "What is the scheduling process?",
    "How do I handle cancellations?",
    "What is the late arrival policy?",
    "How should I end a call?",
    "What are the communication guidelines?",
    "How do I handle walk-ins?",
    "What should I say about wait times?",
    "How do I provide directions?",
    "What is the online booking process?",
];

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Explicit documents; when empty, `index.data_dir` is scanned.
    pub documents: Vec<PathBuf>,
    pub skip_self_test: bool,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest: Manifest,
    pub self_test: Option<SelfTestReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub queries: Vec<SelfTestQuery>,
    pub total_queries: usize,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestQuery {
    pub query: String,
    pub time_ms: f64,
    pub results: Vec<SelfTestHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestHit {
    pub chunk_id: String,
    pub source: String,
    pub score: f32,
}

/// Split documents into chunks with sequential ids across the whole build.
///
/// Position buckets are computed per document from each chunk's offset
/// among that document's chunks.
pub fn chunk_documents(
    docs: &[SourceDocument],
    splitter: &TextSplitter,
    created_at: DateTime<Utc>,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut next_id: u32 = 1;

    for doc in docs {
        let pieces = splitter.split(&doc.text);
        let total = pieces.len();
        for (i, content) in pieces.into_iter().enumerate() {
            let position = ChunkPosition::from_offset(i, total);
            chunks.push(Chunk::new(next_id, content, position, &doc.name, created_at));
            next_id += 1;
        }
        tracing::info!(document = %doc.name, chunks = total, "chunked document");
    }

    chunks
}

/// Embed `chunks` and assemble an in-memory index of `dims` dimensions.
pub async fn embed_chunks(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    dims: usize,
    batch_size: usize,
) -> Result<VectorIndex> {
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embed_batched(embedder, &texts, batch_size)
        .await
        .context("Embedding chunks failed")?;
    VectorIndex::from_parts(dims, vectors, chunks)
}

/// Build, self-test, and persist an index as described by `config`.
pub async fn build_index(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    options: BuildOptions,
) -> Result<BuildReport> {
    let started = Instant::now();

    let splitter = TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;

    let paths = if options.documents.is_empty() {
        loader::discover_documents(&config.index)?
    } else {
        options.documents.clone()
    };
    if paths.is_empty() {
        return Err(SopError::NoDocuments(0).into());
    }
    tracing::info!(candidates = paths.len(), "discovered documents");

    let docs = loader::load_documents(&paths)?;

    let chunks = chunk_documents(&docs, &splitter, Utc::now());
    if chunks.is_empty() {
        return Err(SopError::NoDocuments(docs.len()).into());
    }
    tracing::info!(chunks = chunks.len(), documents = docs.len(), "chunking complete");

    let dims = initialize_embeddings(
        embedder.as_ref(),
        config.embedding.init_attempts,
        Duration::from_secs(config.embedding.init_retry_delay_secs),
    )
    .await?;

    let index = embed_chunks(chunks, embedder.as_ref(), dims, config.embedding.batch_size).await?;
    tracing::info!(vectors = index.len(), dims, "embedding complete");

    let retriever = Retriever::new(index.clone(), Arc::clone(&embedder), config.retrieval.top_k);
    let self_test = if options.skip_self_test {
        None
    } else {
        Some(run_self_test(&retriever, config.retrieval.top_k).await?)
    };

    let sources: Vec<(String, String)> = docs
        .iter()
        .map(|d| (d.name.clone(), d.path.clone()))
        .collect();
    let manifest = Manifest::build(
        &sources,
        index.chunks(),
        BuildSettings {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            top_k: config.retrieval.top_k,
            embedding_model: embedder.model_name().to_string(),
            dims,
        },
        Performance {
            pipeline_time_seconds: round2(started.elapsed().as_secs_f64()),
            retrieval_avg_ms: self_test.as_ref().map(|t| t.avg_time_ms),
        },
    );

    index_store::save_index(&config.index.dir, &index, &manifest)?;
    verify(&config.index.dir, &index)?;

    tracing::info!(
        chunks = manifest.statistics.total_chunks,
        documents = manifest.statistics.total_documents,
        seconds = manifest.performance.pipeline_time_seconds,
        "index build complete"
    );

    Ok(BuildReport {
        manifest,
        self_test,
    })
}

fn verify(dir: &std::path::Path, built: &VectorIndex) -> Result<()> {
    let (loaded, _) = index_store::load_index(dir)?;
    if loaded.len() != built.len() || loaded.dims() != built.dims() {
        bail!(
            "persisted index has {} vectors of {} dims, expected {} of {}",
            loaded.len(),
            loaded.dims(),
            built.len(),
            built.dims()
        );
    }
    Ok(())
}

/// Time each of [`SELF_TEST_QUERIES`] against `retriever`.
pub async fn run_self_test(retriever: &Retriever, top_k: usize) -> Result<SelfTestReport> {
    let mut queries = Vec::with_capacity(SELF_TEST_QUERIES.len());
    let mut total = Duration::ZERO;

    for query in SELF_TEST_QUERIES {
        let start = Instant::now();
        let results = retriever.search(query, top_k).await?;
        let elapsed = start.elapsed();
        total += elapsed;

        queries.push(SelfTestQuery {
            query: query.to_string(),
            time_ms: round2(elapsed.as_secs_f64() * 1000.0),
            results: results
                .iter()
                .map(|r| SelfTestHit {
                    chunk_id: r.chunk.label(),
                    source: r.chunk.source_name.clone(),
                    score: r.score,
                })
                .collect(),
        });
    }

    let total_ms = total.as_secs_f64() * 1000.0;
    let report = SelfTestReport {
        total_queries: queries.len(),
        total_time_ms: round2(total_ms),
        avg_time_ms: round2(total_ms / queries.len().max(1) as f64),
        queries,
    };
    tracing::info!(avg_ms = report.avg_time_ms, "retrieval self-test complete");
    Ok(report)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
