use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docsync"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let input = root.join("source_data");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("alpha.txt"),
        "Alpha notes about Rust programming. Cargo builds crates.",
    )
    .unwrap();
    fs::write(
        input.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.",
    )
    .unwrap();
    fs::write(input.join("beta.md"), "# Beta\n\nMarkdown is not ingested.").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[input]
dir = "{root}/source_data"

[state]
path = "{root}/data/ingest_state.json"

[store]
path = "{root}/data/vectors.sqlite"
collection = "documents"

[embedding]
provider = "hash"
dims = 32
"#,
        root = root.display()
    );
    let config_path = config_dir.join("docsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docsync(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Store initialized"));

    let (_, stderr, ok) = run_docsync(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
    assert!(tmp.path().join("data/vectors.sqlite").exists());
}

#[test]
fn test_ingest_then_rerun() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docsync(&config, &["ingest", "--progress", "none"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("files: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("unsupported: 1"));
    assert!(stdout.contains("indexed: 2"));
    assert!(stdout.contains("failed: 0"));

    let state: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(tmp.path().join("data/ingest_state.json")).unwrap(),
    )
    .unwrap();
    let keys: Vec<&String> = state.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["alpha.txt", "gamma.txt"]);

    let (stdout, _, ok) = run_docsync(&config, &["ingest", "--progress", "none"]);
    assert!(ok);
    assert!(stdout.contains("unchanged: 2"));
    assert!(stdout.contains("indexed: 0"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docsync(&config, &["ingest", "--dry-run", "--progress", "none"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("to process: 2"));
    assert!(!tmp.path().join("data/ingest_state.json").exists());
    assert!(!tmp.path().join("data/vectors.sqlite").exists());
}

#[test]
fn test_status_reports_changes() {
    let (tmp, config) = setup_test_env();
    run_docsync(&config, &["ingest", "--progress", "none"]);

    fs::write(
        tmp.path().join("source_data/gamma.txt"),
        "Gamma was edited after indexing.",
    )
    .unwrap();
    fs::write(tmp.path().join("source_data/delta.txt"), "Delta is new.").unwrap();

    let (stdout, stderr, ok) = run_docsync(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert!(stdout.contains("indexed: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("changed: 1"));
    assert!(stdout.contains("new: 1"));
    assert!(stdout.contains("    delta.txt"));
    assert!(stdout.contains("collection documents: 2 vectors from 2 files"));
}

#[test]
fn test_query_finds_exact_chunk() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["ingest", "--progress", "none"]);

    let (stdout, stderr, ok) = run_docsync(
        &config,
        &[
            "query",
            "Alpha notes about Rust programming. Cargo builds crates.",
            "-k",
            "1",
        ],
    );
    assert!(ok, "query failed: {}", stderr);
    assert!(stdout.starts_with("1. [1.0000] alpha.txt #0"), "stdout: {}", stdout);
}

#[test]
fn test_missing_input_dir_is_not_an_error() {
    let (tmp, config) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("source_data")).unwrap();

    let (stdout, stderr, ok) = run_docsync(&config, &["ingest", "--progress", "none"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("input directory not found"));
    assert!(!tmp.path().join("data/ingest_state.json").exists());
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 10\nchunk_overlap = 20\n").unwrap();

    let (_, stderr, ok) = run_docsync(&bad, &["status"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"));
}
