//! # SOP Agent Core
//!
//! Runtime-free logic for the SOP agent: chunk model, recursive text
//! splitter, embedding trait and vector helpers, in-memory vector index,
//! and the per-turn conversation state machine.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Everything that
//! talks to the outside world lives in the `sop-agent` app crate.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod index;
pub mod models;
