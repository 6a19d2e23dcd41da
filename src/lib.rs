//! # Gated Context
//!
//! Authorization-gated retrieval over a local document store. Documents are
//! ingested, chunked and embedded into SQLite; relationship-based warrants
//! decide which documents each subject may view; every search is confined to
//! that set before similarity ranking happens.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────────────────┐
//! │  ingest  │──▶│ chunk+embed  │──▶│ SQLite                    │
//! │ txt/md/  │   └──────────────┘   │ documents, chunks,        │
//! │   pdf    │──── owner warrant ──▶│ chunk_vectors, warrants   │
//! └──────────┘                      └────────────┬──────────────┘
//!                                                │
//!                  ┌─────────────────────────────┤
//!                  ▼                             ▼
//!             ┌──────────┐                 ┌──────────┐
//!             │   CLI    │                 │   HTTP   │
//!             │  (gctx)  │                 │  server  │
//!             └──────────┘                 └──────────┘
//! ```
//!
//! The authorization model, evaluator, filtered search adapter and retrieval
//! state machine live in `gated-context-core`; this crate supplies the SQLite
//! backends, embedding providers, ingestion and the two front ends.
//!
//! ## Quick Start
//!
//! ```bash
//! gctx init
//! gctx ingest ./docs/plan.md --owner alice
//! gctx share --from alice --to bob doc_1a2b3c4d5e6f7a8b
//! gctx search bob "quarterly budget"
//! gctx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_warrants`] | Warrant backend with revision log |
//! | [`sqlite_index`] | Filtered vector index and document catalog |
//! | [`embedding`] | Embedding providers |
//! | [`extract`] | Text extraction |
//! | [`chunk`] | Text chunking |
//! | [`ingest`] | Ingestion pipeline |
//! | [`app`] | Service wiring |
//! | [`commands`] | CLI commands |
//! | [`server`] | HTTP server |

pub mod app;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod sqlite_index;
pub mod sqlite_warrants;
