//! The durable record of what an environment has installed.
//!
//! One `name==version` pair per line, sorted by name, so the file diffs
//! cleanly. Writes go through a temp file in the same directory followed by
//! an atomic rename; concurrent readers never observe a partial write, and
//! a crash mid-write leaves the previous record intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use burrow_schema::{PackageName, Version};

/// State store failure.
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem failure reading or replacing the record.
    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),

    /// The record contains a line that is not `name==version`. A torn or
    /// hand-mangled record must never be silently accepted.
    #[error("malformed state file {path}: line {line}: '{content}'")]
    Parse {
        /// The state file path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The offending line.
        content: String,
    },
}

/// Reads and atomically replaces an environment's installed-package record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// A store over the given record file. The file need not exist yet.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The record file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded mapping. A missing file is an empty environment.
    pub fn read(&self) -> Result<BTreeMap<PackageName, Version>, StateError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut installed = BTreeMap::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed = line.split_once("==").and_then(|(name, version)| {
                let name = PackageName::new(name);
                if name.is_empty() {
                    return None;
                }
                Version::parse(version).ok().map(|v| (name, v))
            });
            let Some((name, version)) = parsed else {
                return Err(StateError::Parse {
                    path: self.path.clone(),
                    line: index + 1,
                    content: line.to_string(),
                });
            };
            installed.insert(name, version);
        }
        Ok(installed)
    }

    /// Atomically replace the record with `installed`.
    pub fn write(&self, installed: &BTreeMap<PackageName, Version>) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir)?;
        for (name, version) in installed {
            writeln!(file, "{name}=={version}")?;
        }
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), packages = installed.len(), "state committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: &str) -> (PackageName, Version) {
        (PackageName::new(name), Version::parse(version).unwrap())
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("burrow.lock"));
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("burrow.lock"));

        let installed = BTreeMap::from([entry("foo", "1.0"), entry("bar", "2.1.3")]);
        store.write(&installed).unwrap();
        assert_eq!(store.read().unwrap(), installed);
    }

    #[test]
    fn file_is_sorted_one_pair_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("burrow.lock"));

        let installed = BTreeMap::from([entry("zlib", "1.0"), entry("abc", "2.0")]);
        store.write(&installed).unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents, "abc==2.0.0\nzlib==1.0.0\n");
    }

    #[test]
    fn overwrite_replaces_the_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("burrow.lock"));

        store
            .write(&BTreeMap::from([entry("foo", "1.0")]))
            .unwrap();
        store
            .write(&BTreeMap::from([entry("bar", "2.0")]))
            .unwrap();

        let installed = store.read().unwrap();
        assert_eq!(installed.len(), 1);
        assert!(installed.contains_key("bar"));
    }

    #[test]
    fn torn_record_is_an_error_not_a_guess() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.lock");
        std::fs::write(&path, "foo==1.0.0\ngarbage-line\n").unwrap();

        let store = StateStore::new(path);
        let err = store.read().unwrap_err();
        assert!(matches!(err, StateError::Parse { line: 2, .. }));
    }

    #[test]
    fn blank_lines_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.lock");
        std::fs::write(&path, "foo==1.0.0\n\nbar==2.0.0\n").unwrap();

        let store = StateStore::new(path);
        assert_eq!(store.read().unwrap().len(), 2);
    }
}
