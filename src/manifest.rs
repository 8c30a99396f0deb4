//! `index_info.json`: operational summary written next to every index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use sop_agent_core::models::{Chunk, ChunkPosition};

pub const MANIFEST_VERSION: &str = "1.0.0";
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub meta: ManifestMeta,
    pub sources: Vec<SourceEntry>,
    pub settings: BuildSettings,
    pub statistics: Statistics,
    pub source_distribution: BTreeMap<String, usize>,
    pub performance: Performance,
    pub chunks: Vec<ChunkSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestMeta {
    pub version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEntry {
    pub name: String,
    pub path: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_model: String,
    #[serde(default)]
    pub dims: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_characters: usize,
    pub total_words: usize,
    pub avg_chunk_chars: f64,
    pub avg_chunk_words: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Performance {
    pub pipeline_time_seconds: f64,
    /// Average self-test query latency; absent when the self-test was skipped.
    pub retrieval_avg_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkSummary {
    pub id: String,
    pub source: String,
    pub chars: usize,
    pub words: usize,
    pub position: ChunkPosition,
    pub preview: String,
}

impl Manifest {
    /// Summarize a build. `sources` are `(name, path)` of the documents that
    /// were loaded.
    pub fn build(
        sources: &[(String, String)],
        chunks: &[Chunk],
        settings: BuildSettings,
        performance: Performance,
    ) -> Self {
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
        for chunk in chunks {
            *distribution.entry(chunk.source_name.clone()).or_default() += 1;
        }

        let total_characters: usize = chunks.iter().map(|c| c.char_count).sum();
        let total_words: usize = chunks.iter().map(|c| c.word_count).sum();

        Manifest {
            meta: ManifestMeta {
                version: MANIFEST_VERSION.to_string(),
                created_at: Utc::now(),
            },
            sources: sources
                .iter()
                .map(|(name, path)| SourceEntry {
                    name: name.clone(),
                    path: path.clone(),
                    chunks: distribution.get(name).copied().unwrap_or(0),
                })
                .collect(),
            settings,
            statistics: Statistics {
                total_documents: sources.len(),
                total_chunks: chunks.len(),
                total_characters,
                total_words,
                avg_chunk_chars: average(total_characters, chunks.len()),
                avg_chunk_words: average(total_words, chunks.len()),
            },
            source_distribution: distribution,
            performance,
            chunks: chunks
                .iter()
                .map(|c| ChunkSummary {
                    id: c.label(),
                    source: c.source_name.clone(),
                    chars: c.char_count,
                    words: c.word_count,
                    position: c.position,
                    preview: c.preview(PREVIEW_CHARS),
                })
                .collect(),
        }
    }
}

/// Mean rounded to one decimal place; `0.0` for an empty set.
fn average(total: usize, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (total as f64 / count as f64 * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u32, source: &str, text: &str) -> Chunk {
        Chunk::new(id, text.to_string(), ChunkPosition::Beginning, source, Utc::now())
    }

    #[test]
    fn statistics_and_distribution() {
        let chunks = vec![
            chunk(1, "a.txt", "one two"),
            chunk(2, "a.txt", "three"),
            chunk(3, "b.txt", "four five six"),
        ];
        let sources = vec![
            ("a.txt".to_string(), "/d/a.txt".to_string()),
            ("b.txt".to_string(), "/d/b.txt".to_string()),
        ];
        let settings = BuildSettings {
            chunk_size: 500,
            chunk_overlap: 100,
            top_k: 3,
            embedding_model: "hashing-bow".into(),
            dims: 384,
        };
        let manifest = Manifest::build(&sources, &chunks, settings, Performance::default());

        assert_eq!(manifest.statistics.total_chunks, 3);
        assert_eq!(manifest.statistics.total_words, 6);
        assert_eq!(manifest.statistics.total_characters, 7 + 5 + 13);
        assert!((manifest.statistics.avg_chunk_words - 2.0).abs() < 1e-9);
        assert_eq!(manifest.source_distribution["a.txt"], 2);
        assert_eq!(manifest.sources[1].chunks, 1);
        assert_eq!(manifest.chunks[0].id, "chunk_001");
        assert_eq!(manifest.chunks[0].preview, "one two...");
    }

    #[test]
    fn serializes_expected_top_level_keys() {
        let settings = BuildSettings {
            chunk_size: 10,
            chunk_overlap: 2,
            top_k: 1,
            embedding_model: "m".into(),
            dims: 2,
        };
        let manifest = Manifest::build(&[], &[], settings, Performance::default());
        let value = serde_json::to_value(&manifest).unwrap();
        for key in [
            "meta",
            "sources",
            "settings",
            "statistics",
            "source_distribution",
            "performance",
            "chunks",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["statistics"]["avg_chunk_chars"], 0.0);
    }
}
