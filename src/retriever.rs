//! Query-time similarity search over a loaded index.
//!
//! The index is loaded once and shared read-only (`Arc<VectorIndex>`), so a
//! single [`Retriever`] serves any number of concurrent sessions.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

use crate::error::SopError;
use crate::index_store;
use crate::manifest::Manifest;
use sop_agent_core::embedding::{embed_query, EmbeddingProvider};
use sop_agent_core::index::VectorIndex;
use sop_agent_core::models::ScoredChunk;

/// Separator placed between chunks in [`Retriever::get_context`].
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
    manifest: Option<Arc<Manifest>>,
}

impl Retriever {
    /// Wrap an in-memory index.
    pub fn new(index: VectorIndex, embedder: Arc<dyn EmbeddingProvider>, top_k: usize) -> Self {
        Self {
            index: Arc::new(index),
            embedder,
            top_k,
            manifest: None,
        }
    }

    /// Load the index persisted in `dir`.
    ///
    /// Fails with [`SopError::IndexNotFound`] when nothing has been built
    /// there, and refuses an embedder whose dimensionality differs from the
    /// one the index was built with.
    pub fn open(dir: &Path, embedder: Arc<dyn EmbeddingProvider>, top_k: usize) -> Result<Self> {
        let (index, manifest) = index_store::load_index(dir)?;

        let dims = embedder.dims();
        if dims != 0 && !index.is_empty() && dims != index.dims() {
            bail!(
                "index at {} has {}-dimensional vectors but embedding model '{}' produces {}",
                dir.display(),
                index.dims(),
                embedder.model_name(),
                dims
            );
        }

        tracing::info!(
            dir = %dir.display(),
            chunks = index.len(),
            dims = index.dims(),
            "index loaded"
        );

        Ok(Self {
            index: Arc::new(index),
            embedder,
            top_k,
            manifest: manifest.map(Arc::new),
        })
    }

    /// True when queries can be embedded.
    pub fn is_ready(&self) -> bool {
        self.embedder.model_name() != "disabled"
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_deref()
    }

    /// Top `top_k` chunks for `query`, most similar first.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.search_with_filter(query, top_k, None).await
    }

    /// Like [`search`](Self::search), optionally restricted to one source
    /// document name.
    ///
    /// A blank query yields no results and is never sent to the embedder.
    pub async fn search_with_filter(
        &self,
        query: &str,
        top_k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(SopError::InvalidArgument("top_k must be a positive integer".into()).into());
        }
        if query.trim().is_empty() || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;
        if vector.len() != self.index.dims() {
            bail!(
                "query embedding has {} dims, index expects {}",
                vector.len(),
                self.index.dims()
            );
        }

        let results = match source {
            Some(name) => self
                .index
                .search_where(&vector, top_k, |c| c.source_name == name),
            None => self.index.search(&vector, top_k),
        };

        tracing::debug!(
            query,
            top_k,
            results = results.len(),
            best = results.first().map(|r| r.score),
            "search"
        );
        Ok(results)
    }

    /// Content of the top `top_k` chunks joined by [`CONTEXT_SEPARATOR`].
    pub async fn get_context(&self, query: &str, top_k: usize) -> Result<String> {
        let results = self.search(query, top_k).await?;
        Ok(results
            .iter()
            .map(|r| r.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR))
    }
}
