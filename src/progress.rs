//! Ingest progress reporting.
//!
//! Reports what `docsync ingest` is doing so users see which file is being
//! worked on and how many are left. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingest run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunProgressEvent {
    /// Listing and fingerprinting the input directory.
    Discovering { dir: String },
    /// Discovery finished: `total` supported files, `pending` need work.
    Discovered { total: u64, pending: u64 },
    /// File `n` of `pending` is being processed.
    Processing { n: u64, pending: u64, file: String },
    /// Writing the fingerprint map.
    Persisting,
    Done {
        indexed: u64,
        failed: u64,
        unchanged: u64,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  processing  3 / 12  report.pdf".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Discovering { dir } => format!("ingest {}  discovering...\n", dir),
            RunProgressEvent::Discovered { total, pending } => format!(
                "ingest  found {} files, {} to process\n",
                format_number(*total),
                format_number(*pending)
            ),
            RunProgressEvent::Processing { n, pending, file } => format!(
                "ingest  processing  {} / {}  {}\n",
                format_number(*n),
                format_number(*pending),
                file
            ),
            RunProgressEvent::Persisting => "ingest  saving state\n".to_string(),
            RunProgressEvent::Done {
                indexed,
                failed,
                unchanged,
            } => format!(
                "ingest  done: {} indexed, {} failed, {} unchanged\n",
                format_number(*indexed),
                format_number(*failed),
                format_number(*unchanged)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &RunProgressEvent) -> serde_json::Value {
        match event {
            RunProgressEvent::Discovering { dir } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "dir": dir
            }),
            RunProgressEvent::Discovered { total, pending } => serde_json::json!({
                "event": "progress",
                "phase": "discovered",
                "total": total,
                "pending": pending
            }),
            RunProgressEvent::Processing { n, pending, file } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": pending,
                "file": file
            }),
            RunProgressEvent::Persisting => serde_json::json!({
                "event": "progress",
                "phase": "persisting"
            }),
            RunProgressEvent::Done {
                indexed,
                failed,
                unchanged,
            } => serde_json::json!({
                "event": "done",
                "indexed": indexed,
                "failed": failed,
                "unchanged": unchanged
            }),
        }
    }
}

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    #[value(name = "none")]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
