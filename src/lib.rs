//! # docsync
//!
//! Incremental document ingestion for retrieval.
//!
//! docsync watches a flat input directory of PDF and plain-text files,
//! converts each new or changed file to text, splits it into overlapping
//! chunks, embeds the chunks, and upserts them into a SQLite-backed vector
//! collection. A JSON state file maps each file name to the SHA-256 of the
//! last version that was fully indexed, so unchanged files cost one hash
//! per run and failed files are retried automatically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌──────────────┐
//! │ Tracker  │──▶│ Normalizer │──▶│ Chunker │──▶│ IndexingSink │
//! │ (state)  │   │ PDF / txt  │   │         │   │ embed+upsert │
//! └──────────┘   └────────────┘   └─────────┘   └──────┬───────┘
//!                                                      ▼
//!                                               ┌──────────────┐
//!                                               │ SQLite store │
//!                                               └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsync init                   # create the store and collection
//! docsync ingest                 # index new and changed files
//! docsync status                 # what would the next run do?
//! docsync query "refund policy"  # top-k chunks for a question
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`tracker`] | Fingerprint map and change detection |
//! | [`normalize`] | File → text conversion |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`sink`] | Embed + upsert with per-file accounting |
//! | [`pipeline`] | Run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod sink;
pub mod sqlite_store;
pub mod status;
pub mod tracker;

pub use docsync_core::{capability, chunk, models};
