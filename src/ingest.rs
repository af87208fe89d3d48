//! `docsync ingest`: build the pipeline from config and print a summary.

use anyhow::Result;

use docsync_core::capability::Acquired;
use docsync_core::store::memory::InMemoryStore;
use docsync_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::normalize::{resolve_converter, Normalizer};
use crate::pipeline::{FileOutcome, Pipeline, RunReport};
use crate::progress::ProgressMode;
use crate::sink::IndexingSink;
use crate::sqlite_store::SqliteVectorStore;
use crate::tracker::Tracker;

fn warn_if_degraded<T>(what: &str, acquired: &Acquired<T>) {
    if let Some(reason) = acquired.degraded_reason() {
        tracing::warn!(capability = what, reason, "running degraded");
    }
}

/// Wire converter, embedder, and store from `config`.
///
/// A dry run gets an in-memory store so nothing is created on disk.
pub async fn build_pipeline(config: &Config, dry_run: bool) -> Result<Pipeline> {
    let converter = resolve_converter(&config.converter)?;
    warn_if_degraded("converter", &converter);

    let embedder = create_embedder(&config.embedding)?;
    warn_if_degraded("embedder", &embedder);

    let store: Box<dyn VectorStore> = if dry_run {
        Box::new(InMemoryStore::new(config.store.collection.clone()))
    } else {
        Box::new(SqliteVectorStore::open(&config.store).await?)
    };

    let sink = IndexingSink::new(embedder.into_inner(), store, config.embedding.batch_size);
    Ok(Pipeline::new(
        config,
        Tracker::new(&config.state.path),
        Normalizer::new(converter.into_inner()),
        sink,
    ))
}

pub async fn run_ingest(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    let pipeline = build_pipeline(config, dry_run)
        .await?
        .with_progress(progress.reporter());

    let report = if dry_run {
        pipeline.dry_run().await
    } else {
        pipeline.run().await
    };

    print_report(config, &report);
    Ok(())
}

fn print_report(config: &Config, report: &RunReport) {
    let dir = config.input.dir.display();
    if report.dry_run {
        println!("ingest {} (dry-run)", dir);
    } else {
        println!("ingest {}", dir);
    }

    if !report.input_available {
        println!("  input directory not found; nothing to do");
        println!("ok");
        return;
    }

    println!("  files: {}", report.files.len());
    println!("  unsupported: {}", report.unsupported.len());
    println!("  unchanged: {}", report.unchanged());
    if report.dry_run {
        println!("  to process: {}", report.pending());
    } else {
        println!("  indexed: {} ({} chunks)", report.indexed(), report.chunks());
        println!("  failed: {}", report.failed());
        for file in &report.files {
            if let FileOutcome::Failed { stage, reason } = &file.outcome {
                println!("    {} [{}] {}", file.filename, stage.as_str(), reason);
            }
        }
    }
    if !report.pruned.is_empty() {
        let verb = if report.dry_run { "would prune" } else { "pruned" };
        println!("  {}: {}", verb, report.pruned.join(", "));
    }
    if !report.dry_run {
        match &report.save_error {
            None => println!("  state: {} entries", report.state.len()),
            Some(e) => println!("  state: NOT saved ({})", e),
        }
    }
    println!("ok");
}
