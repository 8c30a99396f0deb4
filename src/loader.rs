//! Source document discovery and text extraction.
//!
//! Documents are found by walking `index.data_dir` and filtering paths with
//! the configured include/exclude globs. Supported formats:
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.txt`, `.md` | UTF-8 text as-is |
//! | `.docx` | paragraphs of `word/document.xml`, separated by blank lines |
//! | `.pdf` | `pdf-extract` text layer |
//!
//! A document that is missing, unreadable, or in an unsupported format is
//! logged and skipped. Only when no document at all can be loaded does
//! [`load_documents`] fail.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use quick_xml::events::Event;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::SopError;
use sop_agent_core::models::SourceDocument;

/// Upper bound on the decompressed size of `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported document format: {0}")]
    Unsupported(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("pdf: {0}")]
    Pdf(String),
    #[error("docx: {0}")]
    Docx(String),
    #[error("document has no text")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Docx,
    Pdf,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(DocumentFormat::Text),
            "docx" => Some(DocumentFormat::Docx),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }
}

/// List candidate documents under `config.data_dir`, sorted by path.
pub fn discover_documents(config: &IndexConfig) -> Result<Vec<PathBuf>> {
    let root = &config.data_dir;
    if !root.exists() {
        anyhow::bail!("data directory does not exist: {}", root.display());
    }

    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if include.is_match(rel) && !exclude.is_match(rel) {
            paths.push(entry.path().to_path_buf());
        }
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Load every readable document in `paths`, skipping failures.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        match load_document(path) {
            Ok(doc) => {
                tracing::info!(
                    document = %doc.name,
                    chars = doc.text.chars().count(),
                    "loaded document"
                );
                docs.push(doc);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping document");
            }
        }
    }

    if docs.is_empty() {
        return Err(SopError::NoDocuments(paths.len()).into());
    }
    Ok(docs)
}

/// Read one document and extract its text.
pub fn load_document(path: &Path) -> Result<SourceDocument, LoadError> {
    let format = DocumentFormat::from_path(path)
        .ok_or_else(|| LoadError::Unsupported(path.display().to_string()))?;

    let bytes = std::fs::read(path)?;
    let text = match format {
        DocumentFormat::Text => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentFormat::Docx => extract_docx(&bytes)?,
        DocumentFormat::Pdf => {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| LoadError::Pdf(e.to_string()))?
        }
    };

    if text.trim().is_empty() {
        return Err(LoadError::Empty);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(SourceDocument {
        name,
        path: path.display().to_string(),
        text,
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| LoadError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut xml)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Docx("word/document.xml exceeds size limit".to_string()));
    }

    paragraphs_from_document_xml(&xml)
}

/// Collect `<w:t>` text, ending each `<w:p>` with a blank line so the
/// splitter sees paragraph boundaries.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, LoadError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed_len = out.trim_end_matches(|c: char| c == ' ' || c == '\t').len();
                    out.truncate(trimmed_len);
                    if !out.is_empty() && !out.ends_with("\n\n") {
                        out.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| LoadError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
