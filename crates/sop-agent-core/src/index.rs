//! In-memory vector index over chunk embeddings.
//!
//! Vectors and chunk records are stored in two parallel vectors, so the
//! record for vector `i` is always `chunks[i]`. Search is brute-force
//! cosine similarity, which is exact and fast enough for SOP-sized corpora
//! (hundreds to low thousands of chunks).
//!
//! The index is immutable once handed to a retriever; concurrent searches
//! only need `&self`.

use anyhow::{bail, Result};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dims` dimensions.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Build an index from parallel vectors and chunk records.
    pub fn from_parts(dims: usize, vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<Self> {
        if vectors.len() != chunks.len() {
            bail!(
                "vector count ({}) does not match chunk count ({})",
                vectors.len(),
                chunks.len()
            );
        }
        let mut index = Self::new(dims);
        for (vector, chunk) in vectors.into_iter().zip(chunks) {
            index.insert(chunk, vector)?;
        }
        Ok(index)
    }

    /// Append one chunk and its vector.
    ///
    /// Rejects vectors of the wrong dimensionality and chunk ids that do not
    /// increase.
    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "chunk {} has {} dims, index expects {}",
                chunk.id,
                vector.len(),
                self.dims
            );
        }
        if let Some(last) = self.chunks.last() {
            if chunk.id <= last.id {
                bail!(
                    "chunk id {} is not greater than previous id {}",
                    chunk.id,
                    last.id
                );
            }
        }
        self.vectors.push(vector);
        self.chunks.push(chunk);
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Return the `top_k` most similar chunks, best first.
    ///
    /// Ties are broken by chunk id ascending. `top_k` larger than the index
    /// returns every chunk; an empty index returns nothing.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        self.search_where(query, top_k, |_| true)
    }

    /// Like [`search`](Self::search), restricted to chunks accepted by `filter`.
    pub fn search_where<F>(&self, query: &[f32], top_k: usize, filter: F) -> Vec<ScoredChunk>
    where
        F: Fn(&Chunk) -> bool,
    {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(i, _)| filter(&self.chunks[*i]))
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.chunks[a.0].id.cmp(&self.chunks[b.0].id))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkPosition;
    use chrono::Utc;

    fn chunk(id: u32, text: &str) -> Chunk {
        Chunk::new(id, text.to_string(), ChunkPosition::Middle, "sop.txt", Utc::now())
    }

    fn sample() -> VectorIndex {
        VectorIndex::from_parts(
            2,
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0], vec![1.0, 0.0]],
            vec![chunk(1, "east"), chunk(2, "north"), chunk(3, "northeast"), chunk(4, "east again")],
        )
        .unwrap()
    }

    #[test]
    fn results_sorted_by_score_then_id() {
        let results = sample().search(&[1.0, 0.0], 3);
        let ids: Vec<u32> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![1, 4, 3]);
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[test]
    fn top_k_larger_than_index_returns_all() {
        let results = sample().search(&[0.0, 1.0], 50);
        assert_eq!(results.len(), 4);
        let mut ids: Vec<u32> = results.iter().map(|r| r.chunk.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn empty_index_returns_nothing() {
        assert!(VectorIndex::new(2).search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn rejects_wrong_dims_and_non_increasing_ids() {
        let mut index = VectorIndex::new(2);
        assert!(index.insert(chunk(1, "a"), vec![1.0]).is_err());
        index.insert(chunk(2, "a"), vec![1.0, 0.0]).unwrap();
        assert!(index.insert(chunk(2, "b"), vec![1.0, 0.0]).is_err());
        assert!(index.insert(chunk(1, "c"), vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn from_parts_requires_parallel_lengths() {
        assert!(VectorIndex::from_parts(2, vec![vec![1.0, 0.0]], vec![]).is_err());
    }

    #[test]
    fn filter_restricts_candidates() {
        let results = sample().search_where(&[1.0, 0.0], 10, |c| c.content.contains("north"));
        let ids: Vec<u32> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
