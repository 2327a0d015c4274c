//! # docforge
//!
//! Retrieval-augmented document generation over a local folder of text and
//! Word documents.
//!
//! docforge loads a corpus directory, builds an in-process vector index
//! over it and answers questions or drafts job descriptions and case
//! studies by combining the most relevant passages with a prompt template
//! and a single chat-completion call.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loader /  │──▶│   Chunk +   │──▶│ VectorIndex  │
//! │ Extractor  │   │   Embed     │   │ (in memory)  │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │ query
//!                  ┌──────────┐   ┌─────────▼────┐   ┌────────────┐
//!                  │  Shell   │──▶│   Prompt     │──▶│ Completion │
//!                  │ gen/chat │   │  templates   │   │  (OpenAI)  │
//!                  └──────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docforge extract --source word_docs --output docs/documents.txt
//! docforge search "warehouse automation" --mode keyword
//! docforge generate --mode job-description "Backend Engineer"
//! docforge chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Library error type |
//! | [`models`] | Core data types |
//! | [`extract`] | Word document text extraction |
//! | [`loader`] | Corpus directory loader |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory index and retrieval modes |
//! | [`prompt`] | Generation modes and prompt templates |
//! | [`completion`] | Chat-completion client |
//! | [`pipeline`] | Request → response composition |
//! | [`shell`] | One-shot and interactive front ends |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod loader;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod shell;

pub use error::{Error, Result};
