//! Change-set tracking.
//!
//! The [`Tracker`] owns the state file: a JSON object mapping each input
//! file name to the SHA-256 of the last version that was fully indexed.
//! It is read once when a run starts and written once when it ends, so a
//! run that dies midway leaves the previous state in place.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use docsync_core::models::{Fingerprint, FingerprintMap};

/// Bytes read per hashing step.
const FINGERPRINT_BLOCK_SIZE: usize = 64 * 1024;

pub struct Tracker {
    path: PathBuf,
}

impl Tracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted map.
    ///
    /// A missing file is a first run. An unreadable or malformed file is
    /// logged and treated as empty, which makes the next run reprocess
    /// everything rather than fail.
    pub fn load(&self) -> FingerprintMap {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no state file yet, starting empty");
                return FingerprintMap::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state file unreadable, starting empty");
                return FingerprintMap::new();
            }
        };

        match serde_json::from_str::<FingerprintMap>(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "state file malformed, starting empty");
                FingerprintMap::new()
            }
        }
    }

    /// Atomically replace the state file with `map`.
    ///
    /// The map is written to a temporary file in the same directory and
    /// renamed over the old one, so readers see either the old or the new
    /// content, never a mix.
    pub fn save(&self, map: &FingerprintMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, map)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), entries = map.len(), "state saved");
        Ok(())
    }

    /// Hash a file's bytes in fixed-size blocks.
    pub fn fingerprint(path: &Path) -> io::Result<Fingerprint> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; FINGERPRINT_BLOCK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Fingerprint::new(format!("{:x}", hasher.finalize())))
    }

    /// True when `name` is new or its stored fingerprint differs.
    pub fn has_changed(name: &str, fingerprint: &Fingerprint, map: &FingerprintMap) -> bool {
        map.get(name) != Some(fingerprint)
    }

    /// Names recorded in `map` that are not among `present`, in sorted order.
    pub fn reconcile(map: &FingerprintMap, present: &BTreeSet<String>) -> Vec<String> {
        map.keys()
            .filter(|name| !present.contains(*name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(tmp.path().join("state.json"));
        assert!(tracker.load().is_empty());
    }

    #[test]
    fn malformed_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Tracker::new(&path).load().is_empty());
    }

    #[test]
    fn save_then_load_and_stable_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        let tracker = Tracker::new(&path);

        let mut map = FingerprintMap::new();
        map.insert("b.txt".to_string(), Fingerprint::new("22"));
        map.insert("a.txt".to_string(), Fingerprint::new("11"));
        tracker.save(&map).unwrap();
        let first = std::fs::read(&path).unwrap();

        assert_eq!(tracker.load(), map);
        tracker.save(&tracker.load()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);

        let text = String::from_utf8(first).unwrap();
        assert!(text.find("a.txt").unwrap() < text.find("b.txt").unwrap());
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1, "temp file must not be left behind");
    }

    #[test]
    fn fingerprint_is_sha256_of_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let fp = Tracker::fingerprint(&path).unwrap();
        assert_eq!(
            fp.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn fingerprint_spans_multiple_blocks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        let bytes = vec![7u8; FINGERPRINT_BLOCK_SIZE * 2 + 3];
        std::fs::write(&path, &bytes).unwrap();
        let expected = format!("{:x}", Sha256::digest(&bytes));
        assert_eq!(Tracker::fingerprint(&path).unwrap().as_str(), expected);
    }

    #[test]
    fn fingerprint_missing_file_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(Tracker::fingerprint(&tmp.path().join("nope.txt")).is_err());
    }

    #[test]
    fn has_changed_rules() {
        let mut map = FingerprintMap::new();
        map.insert("a.txt".to_string(), Fingerprint::new("11"));
        assert!(!Tracker::has_changed("a.txt", &Fingerprint::new("11"), &map));
        assert!(Tracker::has_changed("a.txt", &Fingerprint::new("12"), &map));
        assert!(Tracker::has_changed("new.txt", &Fingerprint::new("11"), &map));
    }

    #[test]
    fn reconcile_lists_missing_names() {
        let mut map = FingerprintMap::new();
        map.insert("a.txt".to_string(), Fingerprint::new("1"));
        map.insert("gone.pdf".to_string(), Fingerprint::new("2"));
        let present: BTreeSet<String> = ["a.txt".to_string()].into_iter().collect();
        assert_eq!(Tracker::reconcile(&map, &present), vec!["gone.pdf".to_string()]);
    }
}
