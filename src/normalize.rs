//! Document normalization.
//!
//! Turns an input file into a [`NormalizedDocument`]: markdown or plain
//! text plus `{filename}` metadata. Page-based documents go through a
//! [`DocumentConverter`]; plain text is read as UTF-8.
//!
//! Two page-document backends are available:
//!
//! - **builtin** — extracts the PDF text layer in-process with
//!   `pdf-extract`. It has no OCR, no table-structure recovery and runs on
//!   the CPU, so asking for any of those yields a degraded converter.
//! - **command** — runs an external converter (for example a layout/OCR
//!   toolkit wrapper) and takes its stdout as markdown. OCR, table and
//!   device hints are passed through environment variables.
//!
//! [`resolve_converter`] returns an [`Acquired`] so callers can tell a
//! working-but-reduced converter from an unusable one.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;

use docsync_core::capability::Acquired;
use docsync_core::models::{NormalizedDocument, SourceFormat};

use crate::config::{ConverterConfig, Device};

/// Placeholder in `converter.command` replaced by the input path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Why a file could not be turned into text.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(PathBuf),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("converter command failed: {0}")]
    Command(String),
}

/// Capability that turns one file into text.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;
    async fn convert(&self, path: &Path) -> Result<String, ConvertError>;
}

/// Reads a file as UTF-8 text.
pub struct PlainTextReader;

#[async_trait]
impl DocumentConverter for PlainTextReader {
    fn name(&self) -> &str {
        "text"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| ConvertError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        String::from_utf8(bytes).map_err(|_| ConvertError::InvalidUtf8(path.to_path_buf()))
    }
}

/// In-process PDF text-layer extraction.
pub struct BuiltinPdfConverter;

#[async_trait]
impl DocumentConverter for BuiltinPdfConverter {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| ConvertError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        // pdf-extract can panic on malformed input; the blocking task contains it.
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| ConvertError::Pdf(format!("extractor aborted: {}", e)))?
            .map_err(|e| ConvertError::Pdf(e.to_string()))?;
        Ok(tidy_text(&text))
    }
}

/// External converter process; stdout is the converted markdown.
pub struct CommandConverter {
    argv: Vec<String>,
    do_ocr: bool,
    do_table_structure: bool,
    device: Device,
    num_threads: usize,
}

impl CommandConverter {
    pub fn new(config: &ConverterConfig, device: Device) -> Self {
        Self {
            argv: config.command.clone(),
            do_ocr: config.do_ocr,
            do_table_structure: config.do_table_structure,
            device,
            num_threads: config.num_threads,
        }
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    fn name(&self) -> &str {
        "command"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let input = path.to_string_lossy();
        let mut args = self.argv.iter().map(|a| a.replace(INPUT_PLACEHOLDER, &input));
        let program = args
            .next()
            .ok_or_else(|| ConvertError::Command("empty converter command".to_string()))?;

        let output = tokio::process::Command::new(&program)
            .args(args)
            .env("DOCSYNC_DO_OCR", flag(self.do_ocr))
            .env("DOCSYNC_DO_TABLE_STRUCTURE", flag(self.do_table_structure))
            .env("DOCSYNC_DEVICE", self.device.as_str())
            .env("DOCSYNC_NUM_THREADS", self.num_threads.to_string())
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| ConvertError::Command(format!("could not run '{}': {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::Command(format!(
                "'{}' exited with {}: {}",
                program,
                output.status,
                tail(stderr.trim(), 400)
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| ConvertError::Command(format!("'{}' produced non-UTF-8 output", program)))
    }
}

/// Last `max_chars` characters of `s`.
fn tail(s: &str, max_chars: usize) -> &str {
    match s.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

/// Strip trailing spaces per line and collapse runs of blank lines left by
/// text-layer extraction.
fn tidy_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn program_on_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Build the page-document converter described by `config`.
///
/// Returns `Err` when the backend cannot work at all (unknown backend,
/// converter program missing), `Ok(Degraded)` when it works without some
/// requested feature, and `Ok(Ready)` otherwise.
pub fn resolve_converter(config: &ConverterConfig) -> Result<Acquired<Box<dyn DocumentConverter>>> {
    let device = config.device.resolve();
    let device_reason = device.degraded_reason().map(str::to_string);
    let device = device.into_inner();

    let mut acquired: Acquired<Box<dyn DocumentConverter>> = match config.backend.as_str() {
        "builtin" => {
            let mut a: Acquired<Box<dyn DocumentConverter>> =
                Acquired::Ready(Box::new(BuiltinPdfConverter));
            if config.do_ocr {
                a = a.degrade("builtin backend has no OCR; scanned pages yield no text");
            }
            if config.do_table_structure {
                a = a.degrade("builtin backend does not recover table structure");
            }
            // Without a visible device the resolve reason already says so.
            if config.device == Device::Cuda && device_reason.is_none() {
                a = a.degrade("builtin backend runs on the CPU only");
            }
            a
        }
        "command" => {
            let program = match config.command.first() {
                Some(p) => p,
                None => bail!("converter.command is empty"),
            };
            if !program_on_path(program) {
                bail!("converter program '{}' not found", program);
            }
            Acquired::Ready(Box::new(CommandConverter::new(config, device)))
        }
        other => bail!("Unknown converter backend: '{}'", other),
    };

    if let Some(reason) = device_reason {
        acquired = acquired.degrade(reason);
    }
    Ok(acquired)
}

/// Dispatches a file to the converter for its format.
pub struct Normalizer {
    page: Box<dyn DocumentConverter>,
    text: Box<dyn DocumentConverter>,
}

impl Normalizer {
    /// Normalizer with `page` for PDFs and [`PlainTextReader`] for text.
    pub fn new(page: Box<dyn DocumentConverter>) -> Self {
        Self::with_text_reader(page, Box::new(PlainTextReader))
    }

    pub fn with_text_reader(
        page: Box<dyn DocumentConverter>,
        text: Box<dyn DocumentConverter>,
    ) -> Self {
        Self { page, text }
    }

    pub async fn normalize(
        &self,
        path: &Path,
        format: SourceFormat,
    ) -> Result<NormalizedDocument, ConvertError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let converter = match format {
            SourceFormat::PageDocument => &self.page,
            SourceFormat::PlainText => &self.text,
        };

        let started = Instant::now();
        let text = converter.convert(path).await?;
        tracing::info!(
            file = %filename,
            backend = converter.name(),
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "normalized"
        );

        Ok(NormalizedDocument::new(filename, format, text))
    }
}
