//! Atomic append-only NDJSON writer (§6): every call record is appended
//! by reading the current file, adding one line, and replacing the file
//! via a temp-file-plus-rename so a crash mid-write never leaves a
//! truncated or interleaved record on disk.
//!
//! Grounded in the teacher's `persistence` crate's convention of one
//! narrow store type per concern (`ScyllaClient`, `ScyllaSessionStore`,
//! ...) wrapping a connection/handle; this store wraps a file path
//! instead of a database session, since the only store this system
//! owns is the closing call record, not a queryable history.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PersistenceError, Result};
use crate::record::CallRecord;

#[derive(Clone)]
pub struct CallRecordWriter {
    path: PathBuf,
}

impl CallRecordWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &CallRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line_atomically(&path, &line)).await??;
        Ok(())
    }
}

fn append_line_atomically(path: &Path, line: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));

    let mut contents = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(source) => return Err(PersistenceError::Write { path: path.display().to_string(), source }),
    };
    contents.extend_from_slice(line.as_bytes());
    contents.push(b'\n');

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| PersistenceError::Write { path: path.display().to_string(), source })?;
    tmp.write_all(&contents).map_err(|source| PersistenceError::Write { path: path.display().to_string(), source })?;
    tmp.flush().map_err(|source| PersistenceError::Write { path: path.display().to_string(), source })?;
    tmp.persist(path).map_err(|e| PersistenceError::Write { path: path.display().to_string(), source: e.error })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CallOutcome;
    use chrono::Utc;

    #[tokio::test]
    async fn appended_records_round_trip_as_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.ndjson");
        let writer = CallRecordWriter::new(&path);

        let now = Utc::now();
        let first = CallRecord::new("call-1", now, now, CallOutcome::Completed, 1);
        let second = CallRecord::new("call-2", now, now, CallOutcome::ProviderFatal, 0);

        writer.append(&first).await.unwrap();
        writer.append(&second).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed_first: CallRecord = serde_json::from_str(lines[0]).unwrap();
        let parsed_second: CallRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed_first.call_id, "call-1");
        assert_eq!(parsed_second.call_id, "call-2");
    }

    #[tokio::test]
    async fn appending_to_a_missing_directory_surfaces_a_write_error() {
        let writer = CallRecordWriter::new("/nonexistent-dir-for-test/calls.ndjson");
        let now = Utc::now();
        let record = CallRecord::new("call-1", now, now, CallOutcome::Completed, 0);
        assert!(writer.append(&record).await.is_err());
    }
}
