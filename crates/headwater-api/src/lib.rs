//! # Headwater API
//!
//! Types shared by the Headwater server and its clients. This crate has no
//! async runtime dependency: it holds the wire contract, batch shape
//! resolution, and the collection store abstraction.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`conduit`] | Generation, batch, and tokenization request/response types |
//! | [`batch`] | Batch shape validation and template rendering |
//! | [`embeddings`] | Embedding and collection request/response types |
//! | [`siphon`] | Ingestion request/response types |
//! | [`status`] | Ping, status, and route listing |
//! | [`error`] | Domain errors and the JSON error envelope |
//! | [`store`] | [`store::CollectionStore`] trait + in-memory backend |
//! | [`vectors`] | Cosine similarity and BLOB encoding |

pub mod batch;
pub mod conduit;
pub mod embeddings;
pub mod error;
pub mod siphon;
pub mod status;
pub mod store;
pub mod vectors;
