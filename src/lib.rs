//! # SOP Agent
//!
//! A retrieval-augmented voice assistant for a clinic call center. Callers'
//! questions are answered from the clinic's standard operating procedures:
//! documents are chunked and embedded offline, and at call time a chat
//! model decides when to consult them through two read-only tools.
//!
//! ## Architecture
//!
//! ```text
//!  offline                          call time
//! ┌──────────┐  ┌─────────┐       ┌─────────┐   ┌───────────┐
//! │  loader  │─▶│ indexer │──────▶│retriever│◀──│   tools   │
//! │docx/pdf/ │  │chunk +  │ index │ cosine  │   │search /   │
//! │  txt     │  │ embed   │  dir  │ top-k   │   │lookup_top.│
//! └──────────┘  └─────────┘       └─────────┘   └─────▲─────┘
//!                                                      │
//!                    ┌────────┐   ┌──────────┐   ┌─────┴─────┐
//!                    │ server │──▶│ sessions │──▶│   agent   │◀─▶ chat model
//!                    │ / CLI  │   │ history  │   │ turn loop │
//!                    └────────┘   └──────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed failures callers branch on |
//! | [`loader`] | Document discovery and text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`indexer`] | Offline build pipeline and retrieval self-test |
//! | [`index_store`] | On-disk index format |
//! | [`manifest`] | `index_info.json` build summary |
//! | [`retriever`] | Similarity search over a loaded index |
//! | [`tools`] | `search` and `lookup_topic` |
//! | [`prompts`] | Fixed wording |
//! | [`llm`] | Chat-completion client |
//! | [`agent`] | Per-turn model/tool orchestration |
//! | [`session`] | Per-call history with ordered turns |
//! | [`speech`] | Text-to-speech seam |
//! | [`server`] | HTTP API |
//! | [`stats`] | Index summary for the CLI |

pub mod agent;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index_store;
pub mod indexer;
pub mod llm;
pub mod loader;
pub mod manifest;
pub mod prompts;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod session;
pub mod speech;
pub mod stats;
pub mod tools;
