//! # Frameworkless RAG
//!
//! Retrieval-augmented question answering built from plain parts: a text
//! loader, a word-window chunker, an embedding provider, an exact vector
//! index and a chat-completions client, exposed through a JSON HTTP API and
//! a CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │  loader  │──▶│  chunk  │──▶│ embedding│──▶│   index   │
//! │ PDF/TXT  │   │ words   │   │ provider │   │ flat, IP  │
//! └──────────┘   └─────────┘   └──────────┘   └─────┬─────┘
//!                                                   │ top-k
//!                                                   ▼
//!                 ┌──────────┐               ┌────────────┐
//!                 │   llm    │◀──────────────│   store    │
//!                 │  (Groq)  │    context    │ (knowledge │
//!                 └──────────┘               │    base)   │
//!                                            └─────┬──────┘
//!                                  ┌───────────────┤
//!                                  ▼               ▼
//!                             ┌─────────┐    ┌──────────┐
//!                             │   CLI   │    │   HTTP   │
//!                             │  (rag)  │    │  (axum)  │
//!                             └─────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Text extraction from uploads |
//! | [`chunk`] | Text cleaning and word-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Exact cosine-similarity vector index |
//! | [`llm`] | Answer generation over chat completions |
//! | [`store`] | The persisted knowledge base |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod models;
pub mod query;
pub mod server;
pub mod status;
pub mod store;
