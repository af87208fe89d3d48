//! Core data models used throughout docsync.
//!
//! These types represent the source files, normalized documents, chunks,
//! and vector records that flow through the ingestion pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Metadata key carrying the source file name on documents, chunks and
/// stored vectors.
pub const FILENAME_KEY: &str = "filename";

/// Metadata key carrying a stored vector's position within its file.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Format of an input file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Page-based document (`.pdf`) routed through the conversion capability.
    PageDocument,
    /// Plain UTF-8 text (`.txt`) read directly.
    PlainText,
}

impl SourceFormat {
    /// Classify a path by its extension (case-insensitive).
    ///
    /// Returns `None` for anything that is not `.pdf` or `.txt`; such files
    /// are ignored by the pipeline entirely.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceFormat::PageDocument),
            "txt" => Some(SourceFormat::PlainText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::PageDocument => "page_document",
            SourceFormat::PlainText => "plain_text",
        }
    }
}

/// Hex-encoded SHA-256 digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable mapping of file name to the fingerprint of its last fully
/// indexed version. Ordered so the serialized state file is stable.
pub type FingerprintMap = BTreeMap<String, Fingerprint>;

/// Text produced from exactly one source file.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub filename: String,
    pub format: SourceFormat,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl NormalizedDocument {
    /// Build a document whose metadata carries only the file name.
    pub fn new(filename: impl Into<String>, format: SourceFormat, text: String) -> Self {
        let filename = filename.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(FILENAME_KEY.to_string(), filename.clone());
        Self {
            filename,
            format,
            text,
            metadata,
        }
    }
}

/// A bounded slice of a [`NormalizedDocument`]'s text.
///
/// `start` and `end` are byte offsets into the parent text, so
/// `&doc.text[chunk.start..chunk.end] == chunk.text`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

/// One embedded chunk as handed to a vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl VectorRecord {
    /// File name the record was derived from, if tagged.
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(FILENAME_KEY).map(String::as_str)
    }
}
