//! On-disk index layout.
//!
//! An index directory holds three files:
//!
//! | File | Content |
//! |------|---------|
//! | `vectors.bin` | header (`SOPV`, format version, dims, count) then `count × dims` little-endian f32 |
//! | `chunks.json` | chunk records, in vector order |
//! | `index_info.json` | [`Manifest`] |
//!
//! [`save_index`] writes into a staging directory next to the target and
//! swaps it into place only once every file is on disk, so a failed build
//! never leaves a half-written index behind and never destroys the previous
//! one.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::SopError;
use crate::manifest::Manifest;
use sop_agent_core::embedding::{blob_to_vec, vec_to_blob};
use sop_agent_core::index::VectorIndex;
use sop_agent_core::models::Chunk;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const MANIFEST_FILE: &str = "index_info.json";

const MAGIC: &[u8; 4] = b"SOPV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// True when both data files of an index exist in `dir`.
pub fn index_exists(dir: &Path) -> bool {
    dir.join(VECTORS_FILE).is_file() && dir.join(CHUNKS_FILE).is_file()
}

/// Persist `index` and `manifest` to `dir`, replacing any existing index.
pub fn save_index(dir: &Path, index: &VectorIndex, manifest: &Manifest) -> Result<()> {
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let stem = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{}.staging-{}", stem, &tag[..8]));

    if let Err(e) = write_files(&staging, index, manifest) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let backup = parent.join(format!(".{}.previous-{}", stem, &tag[..8]));
    let had_previous = dir.exists();
    if had_previous {
        if let Err(e) = std::fs::rename(dir, &backup) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e)
                .with_context(|| format!("Failed to move existing index at {}", dir.display()));
        }
    }

    if let Err(e) = std::fs::rename(&staging, dir) {
        let _ = std::fs::remove_dir_all(&staging);
        if had_previous {
            let _ = std::fs::rename(&backup, dir);
        }
        return Err(e).with_context(|| format!("Failed to install index at {}", dir.display()));
    }

    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            tracing::warn!(path = %backup.display(), error = %e, "could not remove previous index");
        }
    }

    tracing::info!(dir = %dir.display(), chunks = index.len(), "index saved");
    Ok(())
}

fn write_files(staging: &Path, index: &VectorIndex, manifest: &Manifest) -> Result<()> {
    std::fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + index.len() * index.dims() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(index.dims() as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for vector in index.vectors() {
        bytes.extend_from_slice(&vec_to_blob(vector));
    }
    std::fs::write(staging.join(VECTORS_FILE), bytes).context("Failed to write vectors")?;

    let chunks = serde_json::to_vec_pretty(index.chunks())?;
    std::fs::write(staging.join(CHUNKS_FILE), chunks).context("Failed to write chunk records")?;

    let manifest = serde_json::to_vec_pretty(manifest)?;
    std::fs::write(staging.join(MANIFEST_FILE), manifest).context("Failed to write manifest")?;

    Ok(())
}

/// Load a persisted index, validating that vectors and records agree.
///
/// A missing index is [`SopError::IndexNotFound`]; inconsistent files are
/// [`SopError::CorruptIndex`]. The manifest is optional.
pub fn load_index(dir: &Path) -> Result<(VectorIndex, Option<Manifest>)> {
    if !index_exists(dir) {
        return Err(SopError::IndexNotFound(dir.to_path_buf()).into());
    }

    let bytes = std::fs::read(dir.join(VECTORS_FILE))
        .with_context(|| format!("Failed to read {}", VECTORS_FILE))?;
    let (dims, vectors) = decode_vectors(&bytes)?;

    let chunk_bytes = std::fs::read(dir.join(CHUNKS_FILE))
        .with_context(|| format!("Failed to read {}", CHUNKS_FILE))?;
    let chunks: Vec<Chunk> = serde_json::from_slice(&chunk_bytes)
        .map_err(|e| SopError::CorruptIndex(format!("{}: {}", CHUNKS_FILE, e)))?;

    let index = VectorIndex::from_parts(dims, vectors, chunks)
        .map_err(|e| SopError::CorruptIndex(e.to_string()))?;

    let manifest = match load_manifest(dir) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "index manifest unavailable");
            None
        }
    };

    Ok((index, manifest))
}

/// Read `index_info.json` from an index directory.
pub fn load_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(SopError::IndexNotFound(dir.to_path_buf()).into());
    }
    let bytes = std::fs::read(&path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(SopError::CorruptIndex(format!("{} has no valid header", VECTORS_FILE)).into());
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(SopError::CorruptIndex(format!("unsupported vectors format {}", version)).into());
    }
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..HEADER_LEN]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| SopError::CorruptIndex("vector header overflows".to_string()))?;
    if body.len() != expected {
        return Err(SopError::CorruptIndex(format!(
            "expected {} bytes of vectors for {} x {}, found {}",
            expected,
            count,
            dims,
            body.len()
        ))
        .into());
    }

    let vectors = if dims == 0 {
        vec![Vec::new(); count]
    } else {
        body.chunks_exact(dims * 4).map(blob_to_vec).collect()
    };
    Ok((dims, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildSettings, Performance};
    use chrono::Utc;
    use sop_agent_core::models::ChunkPosition;

    fn sample_index() -> (VectorIndex, Manifest) {
        let chunks = vec![
            Chunk::new(1, "alpha".into(), ChunkPosition::Beginning, "a.txt", Utc::now()),
            Chunk::new(2, "beta".into(), ChunkPosition::End, "a.txt", Utc::now()),
        ];
        let index =
            VectorIndex::from_parts(3, vec![vec![1.0, 0.0, 0.5], vec![0.0, 1.0, -0.5]], chunks)
                .unwrap();
        let manifest = Manifest::build(
            &[("a.txt".into(), "/a.txt".into())],
            index.chunks(),
            BuildSettings {
                chunk_size: 500,
                chunk_overlap: 100,
                top_k: 3,
                embedding_model: "test".into(),
                dims: 3,
            },
            Performance::default(),
        );
        (index, manifest)
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let (index, manifest) = sample_index();
        save_index(&dir, &index, &manifest).unwrap();

        let (loaded, loaded_manifest) = load_index(&dir).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.vectors(), index.vectors());
        assert_eq!(loaded.chunks(), index.chunks());
        assert_eq!(loaded_manifest.unwrap(), manifest);
    }

    #[test]
    fn save_replaces_previous_index_and_leaves_no_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let (index, manifest) = sample_index();
        save_index(&dir, &index, &manifest).unwrap();
        save_index(&dir, &VectorIndex::new(3), &manifest).unwrap();

        let (loaded, _) = load_index(&dir).unwrap();
        assert!(loaded.is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_index_is_index_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_index(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err.downcast_ref::<SopError>(), Some(SopError::IndexNotFound(_))));
    }

    #[test]
    fn truncated_vectors_are_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let (index, manifest) = sample_index();
        save_index(&dir, &index, &manifest).unwrap();

        let path = dir.join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        std::fs::write(&path, bytes).unwrap();

        let err = load_index(&dir).unwrap_err();
        assert!(matches!(err.downcast_ref::<SopError>(), Some(SopError::CorruptIndex(_))));
    }

    #[test]
    fn record_count_mismatch_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let (index, manifest) = sample_index();
        save_index(&dir, &index, &manifest).unwrap();
        std::fs::write(dir.join(CHUNKS_FILE), "[]").unwrap();

        let err = load_index(&dir).unwrap_err();
        assert!(matches!(err.downcast_ref::<SopError>(), Some(SopError::CorruptIndex(_))));
    }
}
