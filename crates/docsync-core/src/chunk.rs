//! Sentence-boundary text chunker with overlap.
//!
//! Splits a [`NormalizedDocument`]'s text into [`Chunk`]s of at most
//! `chunk_size` characters, where consecutive chunks of the same document
//! share up to `chunk_overlap` characters of trailing context.
//!
//! # Algorithm
//!
//! 1. Cut the text into sentence units. A unit ends after the whitespace
//!    that follows a terminator (`.`, `!`, `?`) or after a paragraph break
//!    (two or more newlines). Units are contiguous, so together they cover
//!    the whole text.
//! 2. Units longer than `chunk_size` are re-cut at word boundaries, and
//!    words still longer than that are cut into fixed character windows.
//! 3. Units are merged greedily into chunks. When the next unit would not
//!    fit, the chunk is emitted and the next one is seeded with the trailing
//!    units of the previous chunk whose total length fits in
//!    `chunk_overlap`.
//! 4. Leading and trailing whitespace is trimmed from each chunk; chunks
//!    that are entirely whitespace are dropped.
//!
//! Lengths are measured in `char`s. Each chunk records its byte range in the
//! parent text and gets a UUIDv5 derived from `filename#index`, so
//! re-indexing the same file overwrites rather than duplicates.
//!
//! # Example
//!
//! ```rust
//! use docsync_core::chunk::{split_document, ChunkerConfig};
//! use docsync_core::models::{NormalizedDocument, SourceFormat};
//!
//! let doc = NormalizedDocument::new("a.txt", SourceFormat::PlainText, "hello world".into());
//! let chunks = split_document(&doc, &ChunkerConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "hello world");
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, NormalizedDocument};

pub const DEFAULT_CHUNK_SIZE: usize = 1500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Size limits for [`split_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Maximum characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Contiguous span of the source text, in byte offsets.
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    chars: usize,
}

impl Unit {
    fn new(text: &str, start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            chars: text[start..end].chars().count(),
        }
    }
}

/// Split several documents, keeping document order and text order within
/// each document.
pub fn split_documents(documents: &[NormalizedDocument], config: &ChunkerConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| split_document(doc, config))
        .collect()
}

/// Split one document into chunks with contiguous indices starting at 0.
///
/// Returns an empty vector when the text is empty or whitespace only.
pub fn split_document(doc: &NormalizedDocument, config: &ChunkerConfig) -> Vec<Chunk> {
    let text = doc.text.as_str();
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);

    let units = refine_units(text, sentence_units(text), size);
    let spans = merge_units(&units, size, overlap);

    let mut chunks = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        let Some((start, end)) = trim_span(text, start, end) else {
            continue;
        };
        let index = chunks.len() as i64;
        chunks.push(make_chunk(doc, index, start, end));
    }
    chunks
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

fn sentence_units(text: &str) -> Vec<Unit> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut units = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if !chars[i].1.is_whitespace() {
            i += 1;
            continue;
        }
        let run_start = i;
        let mut newlines = 0;
        while i < chars.len() && chars[i].1.is_whitespace() {
            if chars[i].1 == '\n' {
                newlines += 1;
            }
            i += 1;
        }
        let after_terminator = run_start > 0 && is_terminator(chars[run_start - 1].1);
        if after_terminator || newlines >= 2 {
            let end = chars.get(i).map(|(b, _)| *b).unwrap_or(text.len());
            units.push(Unit::new(text, start, end));
            start = end;
        }
    }

    if start < text.len() {
        units.push(Unit::new(text, start, text.len()));
    }
    units
}

/// Re-cut oversized units at word boundaries, then at character windows.
fn refine_units(text: &str, units: Vec<Unit>, size: usize) -> Vec<Unit> {
    let mut out = Vec::with_capacity(units.len());
    for unit in units {
        if unit.chars <= size {
            out.push(unit);
            continue;
        }
        for word in word_units(text, unit) {
            if word.chars <= size {
                out.push(word);
            } else {
                out.extend(char_windows(text, word, size));
            }
        }
    }
    out
}

/// Each word together with the whitespace that follows it.
fn word_units(text: &str, unit: Unit) -> Vec<Unit> {
    let slice = &text[unit.start..unit.end];
    let mut words = Vec::new();
    let mut start = unit.start;
    let mut in_space = false;

    for (offset, c) in slice.char_indices() {
        let pos = unit.start + offset;
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            words.push(Unit::new(text, start, pos));
            start = pos;
            in_space = false;
        }
    }
    if start < unit.end {
        words.push(Unit::new(text, start, unit.end));
    }
    words
}

fn char_windows(text: &str, unit: Unit, size: usize) -> Vec<Unit> {
    let mut windows = Vec::new();
    let mut start = unit.start;
    let mut count = 0usize;

    for (offset, _) in text[unit.start..unit.end].char_indices() {
        if count == size {
            let pos = unit.start + offset;
            windows.push(Unit {
                start,
                end: pos,
                chars: size,
            });
            start = pos;
            count = 0;
        }
        count += 1;
    }
    if start < unit.end {
        windows.push(Unit {
            start,
            end: unit.end,
            chars: count,
        });
    }
    windows
}

/// Greedily pack units into `(start, end)` byte spans.
fn merge_units(units: &[Unit], size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Vec<Unit> = Vec::new();
    let mut current_len = 0usize;

    for &unit in units {
        if !current.is_empty() && current_len + unit.chars > size {
            spans.push(span_of(&current));

            // Seed the next chunk with trailing units, leaving room for `unit`.
            let mut carried: Vec<Unit> = Vec::new();
            let mut carried_len = 0usize;
            for prev in current.iter().rev() {
                let next_len = carried_len + prev.chars;
                if next_len > overlap || next_len + unit.chars > size {
                    break;
                }
                carried.push(*prev);
                carried_len = next_len;
            }
            carried.reverse();
            current = carried;
            current_len = carried_len;
        }
        current.push(unit);
        current_len += unit.chars;
    }

    if !current.is_empty() {
        spans.push(span_of(&current));
    }
    spans
}

fn span_of(units: &[Unit]) -> (usize, usize) {
    let start = units.first().map(|u| u.start).unwrap_or(0);
    let end = units.last().map(|u| u.end).unwrap_or(start);
    (start, end)
}

fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed_start = slice.len() - slice.trim_start().len();
    let trimmed_end = slice.trim_end().len();
    if trimmed_start >= trimmed_end {
        return None;
    }
    Some((start + trimmed_start, start + trimmed_end))
}

fn make_chunk(doc: &NormalizedDocument, index: i64, start: usize, end: usize) -> Chunk {
    let text = &doc.text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", doc.filename, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        filename: doc.filename.clone(),
        chunk_index: index,
        text: text.to_string(),
        start,
        end,
        hash,
        metadata: doc.metadata.clone(),
    }
}
