//! Core data models shared by the index builder, retriever, and agent.
//!
//! A [`SourceDocument`] is loaded text before splitting. A [`Chunk`] is an
//! immutable span of that text enriched with identifying and positional
//! metadata. A [`ScoredChunk`] pairs a chunk with its similarity to a query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Raw document text produced by a loader, before chunking.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File name (e.g. `"WellStreet SOP.docx"`).
    pub name: String,
    /// Path the document was read from, as given to the builder.
    pub path: String,
    pub text: String,
}

/// Coarse location of a chunk inside its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPosition {
    Beginning,
    Middle,
    End,
}

impl ChunkPosition {
    /// Bucket a chunk by its fractional offset `index / total`.
    ///
    /// The first 20% of a document is `Beginning`, the last 20% is `End`.
    pub fn from_offset(index: usize, total: usize) -> Self {
        if total == 0 {
            return ChunkPosition::Beginning;
        }
        let pct = index as f64 / total as f64;
        if pct < 0.2 {
            ChunkPosition::Beginning
        } else if pct > 0.8 {
            ChunkPosition::End
        } else {
            ChunkPosition::Middle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkPosition::Beginning => "beginning",
            ChunkPosition::Middle => "middle",
            ChunkPosition::End => "end",
        }
    }
}

impl fmt::Display for ChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded span of source text stored alongside one index vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Sequence id, 1-based, unique and increasing within one index build.
    pub id: u32,
    pub content: String,
    /// Length of `content` in characters.
    pub char_count: usize,
    pub word_count: usize,
    pub position: ChunkPosition,
    pub source_name: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Build a chunk and derive its counts and content hash.
    pub fn new(
        id: u32,
        content: String,
        position: ChunkPosition,
        source_name: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let char_count = content.chars().count();
        let word_count = content.split_whitespace().count();
        let hash = content_hash(&content);
        Self {
            id,
            content,
            char_count,
            word_count,
            position,
            source_name: source_name.to_string(),
            created_at,
            hash,
        }
    }

    /// Display label used in tool output and manifests, e.g. `chunk_007`.
    pub fn label(&self) -> String {
        format!("chunk_{:03}", self.id)
    }

    /// First `max_chars` characters with newlines flattened, for previews.
    pub fn preview(&self, max_chars: usize) -> String {
        let head: String = self.content.chars().take(max_chars).collect();
        format!("{}...", head.replace('\n', " "))
    }
}

/// A retrieved chunk and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
