//! # Scholar RAG
//!
//! Question answering over a local corpus of JSON documents.
//!
//! Scholar loads JSON / JSON Lines records, splits them into overlapping
//! chunks, embeds and indexes them as an immutable versioned snapshot, and
//! answers questions with a language model grounded in the retrieved
//! passages, citing each one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│    Index     │
//! │ JSON(L)  │   │ overlap │   │ SQLite snap. │
//! └──────────┘   └─────────┘   └──────┬───────┘
//!                                     │ Arc<Snapshot>
//!                              ┌──────▼───────┐   ┌─────────────┐
//!                 question ───▶│  Retriever   │──▶│ Synthesizer │──▶ answer + sources
//!                              └──────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scholar ingest --corpus ./data
//! scholar ask "Where is the Eiffel Tower?"
//! scholar status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`loader`] | JSON / JSONL corpus loading |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedder abstraction and providers |
//! | [`generation`] | Generator abstraction and providers |
//! | [`index`] | Versioned snapshot index |
//! | [`retrieve`] | Query → ranked chunks |
//! | [`synthesize`] | Grounded, cited answers |
//! | [`pipeline`] | `ingest` / `ask` / `status` / `reset` |
//! | [`report`] | CLI output |
//! | [`db`] | Snapshot database connection |
//! | [`migrate`] | Snapshot schema |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
mod http;
pub mod index;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod retrieve;
pub mod synthesize;

pub use error::{Error, Result};
pub use pipeline::{AskOptions, Pipeline};
