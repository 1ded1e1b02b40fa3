//! # Headwater
//!
//! A facade server in front of LLM generation, embedding, and document
//! ingestion backends, plus a client for it.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   HTTP ────────▶│  axum server  │
//!                 └──────┬───────┘
//!        ┌───────────────┼────────────────┬──────────────┐
//!        ▼               ▼                ▼              ▼
//!  ┌───────────┐  ┌─────────────┐  ┌────────────┐  ┌──────────┐
//!  │  Conduit   │  │ Embeddings   │  │ Collections │  │  Siphon   │
//!  │ batch exec │  │ ollama/openai│  │ memory/sqlite│  │ extract  │
//!  └─────┬─────┘  └─────────────┘  └────────────┘  └──────────┘
//!        ▼
//!  ┌───────────────────────────┐
//!  │ GenerationDispatch         │
//!  │ async tasks | blocking pool│
//!  └───────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`generation`] | Generation backends, dispatch strategy, response cache |
//! | [`executor`] | Bounded-concurrency batch execution |
//! | [`batch`] | Batch facade: wire request in, wire response out |
//! | [`tokenize`] | Token counting |
//! | [`embedding`] | Embedding providers and model resolution |
//! | [`collections`] | Collection service and SQLite backend |
//! | [`extract`] | Text extraction per source type |
//! | [`chunk`] | Paragraph chunking |
//! | [`siphon`] | Content ingestion |
//! | [`status`] | Health checks |
//! | [`server`] | HTTP server |
//! | [`client`] | Async and blocking HTTP clients |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Collection schema |
//!
//! Wire types live in the `headwater-api` crate.

pub mod batch;
pub mod chunk;
pub mod client;
pub mod collections;
pub mod config;
pub mod db;
pub mod embedding;
pub mod executor;
pub mod extract;
pub mod generation;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod siphon;
pub mod status;
pub mod tokenize;
