//! Ingest run orchestration.
//!
//! One [`Pipeline::run`] walks the state machine
//!
//! ```text
//! IDLE → DISCOVERING → per file: UNCHANGED | NORMALIZED → CHUNKED → INDEXED | FAILED
//!      → PERSISTING → DONE
//! ```
//!
//! Files are processed one at a time, in file-name order. A file's new
//! fingerprint is staged only after every one of its chunks is confirmed
//! stored; a file that fails at any stage keeps its previous entry and is
//! retried on the next run. The fingerprint map is saved once, after the
//! loop, so a run killed midway leaves the previous state file intact.
//!
//! Per-file errors never abort the run. A missing input directory ends the
//! run right after discovery with an empty report and no save.

use std::collections::BTreeSet;
use std::path::PathBuf;

use walkdir::WalkDir;

use docsync_core::chunk::{split_document, ChunkerConfig};
use docsync_core::models::{Fingerprint, FingerprintMap, SourceFormat};

use crate::config::Config;
use crate::normalize::{ConvertError, Normalizer};
use crate::progress::{NoProgress, RunProgressEvent, RunProgressReporter};
use crate::sink::IndexingSink;
use crate::tracker::Tracker;

/// Stage at which a file stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fingerprint,
    Normalize,
    Index,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fingerprint => "fingerprint",
            Stage::Normalize => "normalize",
            Stage::Index => "index",
        }
    }
}

/// Per-file failure, caught and recorded rather than propagated.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("cannot fingerprint: {0}")]
    Fingerprint(#[source] std::io::Error),
    #[error(transparent)]
    Normalize(#[from] ConvertError),
    #[error("{failed} of {chunks} chunks not indexed: {reason}")]
    Index {
        chunks: usize,
        failed: usize,
        reason: String,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Fingerprint(_) => Stage::Fingerprint,
            StageError::Normalize(_) => Stage::Normalize,
            StageError::Index { .. } => Stage::Index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Fingerprint matched the stored one; nothing was done.
    Unchanged,
    /// Would be processed (dry runs only).
    Pending,
    /// Every chunk is stored.
    Indexed { chunks: usize },
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub filename: String,
    pub format: SourceFormat,
    /// `None` when the file could not be hashed.
    pub fingerprint: Option<Fingerprint>,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// False when the input directory was missing or unreadable.
    pub input_available: bool,
    pub dry_run: bool,
    /// Supported files in file-name order.
    pub files: Vec<FileReport>,
    /// Files ignored because of their extension.
    pub unsupported: Vec<String>,
    /// State entries removed because their file is gone.
    pub pruned: Vec<String>,
    /// The fingerprint map as of the end of the run.
    pub state: FingerprintMap,
    pub saved: bool,
    pub save_error: Option<String>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Indexed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Unchanged))
    }

    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Pending))
    }

    pub fn chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Indexed { chunks } => chunks,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, filename: &str) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|f| f.filename == filename)
            .map(|f| &f.outcome)
    }
}

/// A supported input file found during discovery.
struct Candidate {
    name: String,
    path: PathBuf,
    format: SourceFormat,
    fingerprint: Option<Fingerprint>,
}

struct Discovery {
    candidates: Vec<Candidate>,
    unsupported: Vec<String>,
}

pub struct Pipeline {
    input_dir: PathBuf,
    chunker: ChunkerConfig,
    prune_missing: bool,
    tracker: Tracker,
    normalizer: Normalizer,
    sink: IndexingSink,
    progress: Box<dyn RunProgressReporter>,
}

impl Pipeline {
    pub fn new(config: &Config, tracker: Tracker, normalizer: Normalizer, sink: IndexingSink) -> Self {
        Self {
            input_dir: config.input.dir.clone(),
            chunker: config.chunking.chunker(),
            prune_missing: config.pipeline.prune_missing,
            tracker,
            normalizer,
            sink,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn RunProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn sink(&self) -> &IndexingSink {
        &self.sink
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Run one ingest pass.
    pub async fn run(&self) -> RunReport {
        self.execute(false).await
    }

    /// Discover and classify without normalizing, indexing, or saving.
    pub async fn dry_run(&self) -> RunReport {
        self.execute(true).await
    }

    async fn execute(&self, dry_run: bool) -> RunReport {
        let previous = self.tracker.load();
        let mut report = RunReport {
            dry_run,
            state: previous.clone(),
            ..RunReport::default()
        };

        self.progress.report(RunProgressEvent::Discovering {
            dir: self.input_dir.display().to_string(),
        });
        let Some(discovery) = self.discover() else {
            return report;
        };
        report.input_available = true;
        report.unsupported = discovery.unsupported;

        let pending: BTreeSet<&str> = discovery
            .candidates
            .iter()
            .filter(|c| match &c.fingerprint {
                Some(fp) => Tracker::has_changed(&c.name, fp, &previous),
                None => true,
            })
            .map(|c| c.name.as_str())
            .collect();
        self.progress.report(RunProgressEvent::Discovered {
            total: discovery.candidates.len() as u64,
            pending: pending.len() as u64,
        });
        if pending.is_empty() {
            tracing::info!(dir = %self.input_dir.display(), "no new or changed documents");
        }

        let mut staged = previous.clone();
        let mut n = 0u64;
        for candidate in &discovery.candidates {
            let outcome = if !pending.contains(candidate.name.as_str()) {
                tracing::debug!(file = %candidate.name, "unchanged, skipping");
                FileOutcome::Unchanged
            } else if dry_run {
                FileOutcome::Pending
            } else {
                n += 1;
                self.progress.report(RunProgressEvent::Processing {
                    n,
                    pending: pending.len() as u64,
                    file: candidate.name.clone(),
                });
                match self.process(candidate).await {
                    Ok(chunks) => {
                        if let Some(fp) = &candidate.fingerprint {
                            staged.insert(candidate.name.clone(), fp.clone());
                        }
                        FileOutcome::Indexed { chunks }
                    }
                    Err(e) => {
                        tracing::warn!(
                            file = %candidate.name,
                            stage = e.stage().as_str(),
                            error = %e,
                            "file failed; will retry next run"
                        );
                        FileOutcome::Failed {
                            stage: e.stage(),
                            reason: e.to_string(),
                        }
                    }
                }
            };

            report.files.push(FileReport {
                filename: candidate.name.clone(),
                format: candidate.format,
                fingerprint: candidate.fingerprint.clone(),
                outcome,
            });
        }

        if self.prune_missing {
            let present: BTreeSet<String> =
                discovery.candidates.iter().map(|c| c.name.clone()).collect();
            report.pruned = if dry_run {
                Tracker::reconcile(&previous, &present)
            } else {
                self.prune(&mut staged, &present).await
            };
        }
        if dry_run {
            return report;
        }

        self.progress.report(RunProgressEvent::Persisting);
        match self.tracker.save(&staged) {
            Ok(()) => report.saved = true,
            Err(e) => {
                tracing::warn!(
                    path = %self.tracker.path().display(),
                    error = %format!("{:#}", e),
                    "could not save state; next run will reprocess"
                );
                report.save_error = Some(format!("{:#}", e));
            }
        }
        report.state = staged;

        match self.sink.store().count().await {
            Ok(count) => tracing::info!(
                collection = self.sink.store().collection(),
                vectors = count,
                "collection size"
            ),
            Err(e) => tracing::warn!(error = %e, "could not count collection"),
        }

        self.progress.report(RunProgressEvent::Done {
            indexed: report.indexed() as u64,
            failed: report.failed() as u64,
            unchanged: report.unchanged() as u64,
        });
        report
    }

    /// Normalize, chunk, and index one file. Returns the chunk count.
    async fn process(&self, candidate: &Candidate) -> Result<usize, StageError> {
        let doc = self
            .normalizer
            .normalize(&candidate.path, candidate.format)
            .await?;

        let chunks = split_document(&doc, &self.chunker);
        tracing::debug!(file = %candidate.name, chunks = chunks.len(), "chunked");

        let result = self.sink.index_file(&candidate.name, &chunks).await;
        if !result.is_complete() {
            return Err(StageError::Index {
                chunks: result.chunks,
                failed: result.failed,
                reason: result.error.unwrap_or_else(|| "incomplete".to_string()),
            });
        }
        Ok(chunks.len())
    }

    /// List the input directory (flat), classify by extension, fingerprint
    /// supported files. `None` when the directory cannot be listed.
    fn discover(&self) -> Option<Discovery> {
        let dir = &self.input_dir;
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "input directory does not exist; nothing to do");
            return None;
        }

        let mut candidates = Vec::new();
        let mut unsupported = Vec::new();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    tracing::warn!(dir = %dir.display(), error = %e, "cannot list input directory");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let Some(format) = SourceFormat::from_path(entry.path()) else {
                tracing::debug!(file = %name, "unsupported extension, ignoring");
                unsupported.push(name);
                continue;
            };

            let fingerprint = match Tracker::fingerprint(entry.path()) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    tracing::warn!(
                        file = %name,
                        error = %StageError::Fingerprint(e),
                        "processing without a fingerprint"
                    );
                    None
                }
            };

            candidates.push(Candidate {
                name,
                path: entry.path().to_path_buf(),
                format,
                fingerprint,
            });
        }

        Some(Discovery {
            candidates,
            unsupported,
        })
    }

    /// Drop vectors and state entries for files no longer present.
    async fn prune(&self, staged: &mut FingerprintMap, present: &BTreeSet<String>) -> Vec<String> {
        let mut pruned = Vec::new();
        for name in Tracker::reconcile(staged, present) {
            match self.sink.store().delete_source(&name).await {
                Ok(removed) => {
                    tracing::info!(file = %name, removed, "pruned missing file");
                    staged.remove(&name);
                    pruned.push(name);
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "could not prune missing file");
                }
            }
        }
        pruned
    }
}
