//! Summary of the persisted index, printed by `sop-agent stats`.
//!
//! Everything comes from `index_info.json`; only the on-disk size is read
//! from the filesystem.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::Path;

use crate::config::Config;
use crate::index_store::{self, VECTORS_FILE};
use crate::manifest::Manifest;

pub fn run_stats(config: &Config) -> Result<()> {
    let manifest = index_store::load_manifest(&config.index.dir)?;
    print!("{}", render_stats(&config.index.dir, &manifest));
    Ok(())
}

/// Format `manifest` for the terminal.
pub fn render_stats(dir: &Path, manifest: &Manifest) -> String {
    let size = std::fs::metadata(dir.join(VECTORS_FILE))
        .map(|m| m.len())
        .unwrap_or(0);
    let stats = &manifest.statistics;
    let settings = &manifest.settings;

    let mut out = String::new();
    let _ = writeln!(out, "SOP Index Stats");
    let _ = writeln!(out, "===============");
    let _ = writeln!(out);
    let _ = writeln!(out, "  Index:       {}", dir.display());
    let _ = writeln!(out, "  Vectors:     {}", format_bytes(size));
    let _ = writeln!(out, "  Built:       {}", format_relative(manifest.meta.created_at));
    let _ = writeln!(out);
    let _ = writeln!(out, "  Documents:   {}", stats.total_documents);
    let _ = writeln!(out, "  Chunks:      {}", stats.total_chunks);
    let _ = writeln!(out, "  Characters:  {}", stats.total_characters);
    let _ = writeln!(out, "  Words:       {}", stats.total_words);
    let _ = writeln!(
        out,
        "  Avg chunk:   {:.1} chars / {:.1} words",
        stats.avg_chunk_chars, stats.avg_chunk_words
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Chunking:    size {} / overlap {}",
        settings.chunk_size, settings.chunk_overlap
    );
    let _ = writeln!(
        out,
        "  Embeddings:  {} ({} dims)",
        settings.embedding_model, settings.dims
    );
    let _ = writeln!(out, "  Top K:       {}", settings.top_k);
    let _ = writeln!(
        out,
        "  Build time:  {:.2}s",
        manifest.performance.pipeline_time_seconds
    );
    if let Some(ms) = manifest.performance.retrieval_avg_ms {
        let _ = writeln!(out, "  Retrieval:   {:.2} ms avg", ms);
    }

    if !manifest.sources.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  By source:");
        let _ = writeln!(out, "  {:<40} {:>8}", "SOURCE", "CHUNKS");
        let _ = writeln!(out, "  {}", "-".repeat(49));
        for source in &manifest.sources {
            let _ = writeln!(out, "  {:<40} {:>8}", source.name, source.chunks);
        }
    }
    let _ = writeln!(out);
    out
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date after 30 days.
fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();

    if delta < 0 || delta >= 86400 * 30 {
        at.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildSettings, Performance};
    use sop_agent_core::models::{Chunk, ChunkPosition};

    #[test]
    fn renders_counts_and_sources() {
        let chunks = vec![Chunk::new(
            1,
            "Walk-ins welcome".into(),
            ChunkPosition::Beginning,
            "sop.docx",
            Utc::now(),
        )];
        let manifest = Manifest::build(
            &[("sop.docx".into(), "/data/sop.docx".into())],
            &chunks,
            BuildSettings {
                chunk_size: 500,
                chunk_overlap: 100,
                top_k: 3,
                embedding_model: "hashing-bow".into(),
                dims: 384,
            },
            Performance {
                pipeline_time_seconds: 1.5,
                retrieval_avg_ms: Some(0.42),
            },
        );
        let text = render_stats(Path::new("/nonexistent"), &manifest);
        assert!(text.contains("Chunks:      1"));
        assert!(text.contains("hashing-bow (384 dims)"));
        assert!(text.contains("0.42 ms avg"));
        assert!(text.contains("sop.docx"));
        assert!(text.contains("just now"));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(10), "10 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
