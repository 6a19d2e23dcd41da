//! # Gated Context Core
//!
//! Authorization-gated retrieval: a relationship-based access-control model
//! (warrants plus relation inheritance) intersected with vector similarity
//! search, so a query only ever returns chunks of documents the requesting
//! principal may view.
//!
//! This crate holds the backend-agnostic pieces. Concrete SQLite backends,
//! embedding providers, ingestion, the CLI and the HTTP server live in the
//! `gated-context` app crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`schema`] | Declarative relations and implication rules |
//! | [`store`] | Warrant backend trait, schema-aware relation store |
//! | [`evaluator`] | `check` and `list_accessible` |
//! | [`index`] | Filtered vector search backend trait and adapter |
//! | [`retrieval`] | Request state machine and `share` |
//! | [`embedding`] | Embedding provider trait, vector helpers |
//! | [`catalog`] | Document display names |
//! | [`error`] | Error taxonomy |

pub mod catalog;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod timing;
