//! Recursive character text splitter.
//!
//! Splits document text into overlapping pieces no longer than
//! `chunk_size` characters, preferring the coarsest natural boundary
//! available.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from the prioritized list that occurs in
//!    the text (paragraph breaks, line breaks, sentence punctuation, clause
//!    punctuation, whitespace, and finally the empty separator, which means
//!    "split between characters").
//! 2. Split on it, keeping the separator attached to the end of the piece
//!    it terminates so no text is lost.
//! 3. Pieces shorter than `chunk_size` are greedily merged into chunks. When
//!    a chunk is full it is emitted and pieces are dropped from its front
//!    until at most `chunk_overlap` characters remain; those carry over into
//!    the next chunk.
//! 4. Pieces that are still too long are split again with the remaining,
//!    finer separators.
//!
//! All lengths are measured in characters, never bytes, so multi-byte text
//! is never cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use sop_agent_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(40, 10).unwrap();
//! let chunks = splitter.split("First paragraph.\n\nSecond paragraph that is a bit longer.");
//! assert_eq!(chunks, vec!["First paragraph.", "Second paragraph that is a bit longer."]);
//! ```

use anyhow::{bail, Result};
use std::collections::VecDeque;

/// Separators tried in order, coarsest first.
pub const DEFAULT_SEPARATORS: &[&str] = &[
    "\n\n\n", "\n\n", "\n", ". ", "? ", "! ", "; ", ": ", ", ", " ", "",
];

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Splits text on a prioritized list of separators with overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// Create a splitter using [`DEFAULT_SEPARATORS`].
    ///
    /// Fails unless `chunk_size > chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Replace the separator list. An empty list behaves like `[""]`.
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let mut chunks = Vec::new();
        let mut mergeable: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                mergeable.push(piece);
                continue;
            }

            if !mergeable.is_empty() {
                chunks.extend(self.merge(&mergeable));
                mergeable.clear();
            }

            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !mergeable.is_empty() {
            chunks.extend(self.merge(&mergeable));
        }

        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);

                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_joined(&mut chunks, &window);
        chunks
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [String]) -> (&'s str, &'s [String]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return ("", &[]);
        }
        if text.contains(sep.as_str()) {
            return (sep.as_str(), &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split_inclusive(separator)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
