//! `docsync status`: compare the state file with the input directory.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use docsync_core::models::{FingerprintMap, SourceFormat};
use docsync_core::store::VectorStore;

use crate::config::Config;
use crate::sqlite_store::SqliteVectorStore;
use crate::tracker::Tracker;

/// How each file in the input directory relates to the stored state.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub indexed: Vec<String>,
    pub changed: Vec<String>,
    pub new: Vec<String>,
    pub unsupported: Vec<String>,
    /// Recorded in the state file but no longer on disk.
    pub missing: Vec<String>,
}

/// Classify the input directory against `map`. Reads and hashes files but
/// writes nothing.
pub fn compute_status(config: &Config, map: &FingerprintMap) -> Result<Status> {
    let mut status = Status::default();
    let dir = &config.input.dir;
    if !dir.is_dir() {
        status.missing = map.keys().cloned().collect();
        return Ok(status);
    }

    let mut present = BTreeSet::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if SourceFormat::from_path(entry.path()).is_none() {
            status.unsupported.push(name);
            continue;
        }
        present.insert(name.clone());

        match Tracker::fingerprint(entry.path()) {
            Ok(fp) if !Tracker::has_changed(&name, &fp, map) => status.indexed.push(name),
            _ if map.contains_key(&name) => status.changed.push(name),
            _ => status.new.push(name),
        }
    }
    status.missing = Tracker::reconcile(map, &present);
    Ok(status)
}

pub async fn run_status(config: &Config) -> Result<()> {
    let tracker = Tracker::new(&config.state.path);
    let map = tracker.load();
    let status = compute_status(config, &map)?;

    println!("status {}", config.input.dir.display());
    println!("  state file: {} ({} entries)", tracker.path().display(), map.len());
    println!("  indexed: {}", status.indexed.len());
    print_names("changed", &status.changed);
    print_names("new", &status.new);
    print_names("unsupported", &status.unsupported);
    print_names("missing", &status.missing);

    if config.store.path.exists() {
        let store = SqliteVectorStore::open(&config.store).await?;
        println!(
            "  collection {}: {} vectors from {} files",
            store.collection(),
            store.count().await?,
            store.source_count().await?
        );
        store.close().await;
    } else {
        println!("  store: not created yet (run `docsync init` or `docsync ingest`)");
    }
    Ok(())
}

fn print_names(label: &str, names: &[String]) {
    println!("  {}: {}", label, names.len());
    for name in names {
        println!("    {}", name);
    }
}
