//! Typed failures that callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context. These variants
//! are wrapped in `anyhow::Error` too and recovered with `downcast_ref`
//! where the distinction matters (startup checks, HTTP status mapping).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SopError {
    #[error("index not found at {0} (run `sop-agent build-index` first)")]
    IndexNotFound(PathBuf),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("no loadable documents among {0} candidate(s)")]
    NoDocuments(usize),

    #[error("embedding initialization failed after {attempts} attempt(s): {message}")]
    EmbeddingInit { attempts: u32, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("model returned an empty reply")]
    EmptyReply,

    #[error("turn exceeded {0} second budget")]
    TurnTimeout(u64),

    #[error("tool round-trip limit of {0} reached")]
    ToolRoundLimit(usize),
}

/// Returns the [`SopError`] inside `err`, if there is one.
pub fn as_sop_error(err: &anyhow::Error) -> Option<&SopError> {
    err.downcast_ref::<SopError>()
}
