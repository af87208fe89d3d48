//! # docsync core
//!
//! Platform-neutral logic shared by the docsync pipeline: data models,
//! chunking, the vector-store abstraction, the embedder trait, and typed
//! capability acquisition.
//!
//! This crate performs no filesystem or network I/O.

pub mod capability;
pub mod chunk;
pub mod embedding;
pub mod models;
pub mod store;
