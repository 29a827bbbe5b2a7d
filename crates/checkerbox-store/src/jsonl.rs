//! JSON-lines file backend for [`RecordStore`].
//!
//! Layout inside the store directory:
//! - `reports.jsonl` - one serialized [`Report`] per line
//! - `log.jsonl` - one serialized [`LogEntry`] per line

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::records::{LogEntry, Report};
use crate::storage_traits::{RecordStore, StorageResult};

pub const REPORTS_FILE: &str = "reports.jsonl";
pub const LOG_FILE: &str = "log.jsonl";

/// Append-only record store writing JSON lines under a directory.
pub struct JsonlRecordStore {
    dir: PathBuf,
    // serializes appends so concurrent runners never interleave partial lines
    write_lock: Mutex<()>,
}

impl JsonlRecordStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        debug!(dir = %dir.display(), "Opened JSON-lines record store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> StorageResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.dir.join(file);
        let _guard = self.write_lock.lock().await;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        handle
            .write_all(&line)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        handle.flush().await.map_err(|e| StorageError::io(&path, e))
    }

    async fn read_all<T: DeserializeOwned>(&self, file: &str) -> StorageResult<Vec<T>> {
        let path = self.dir.join(file);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
                    path: path.clone(),
                    line: idx + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn append_report(&self, report: Report) -> StorageResult<()> {
        self.append(REPORTS_FILE, &report).await
    }

    async fn append_log(&self, entry: LogEntry) -> StorageResult<()> {
        self.append(LOG_FILE, &entry).await
    }

    async fn reports(&self) -> StorageResult<Vec<Report>> {
        self.read_all(REPORTS_FILE).await
    }

    async fn logs(&self) -> StorageResult<Vec<LogEntry>> {
        self.read_all(LOG_FILE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Verdict;

    #[tokio::test]
    async fn test_open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("store");
        let store = JsonlRecordStore::open(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_line_number() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlRecordStore::open(tmp.path()).await.unwrap();

        let mut report = Report::new("config.json", 0);
        report.set_overall(Verdict::Pass);
        let valid = serde_json::to_string(&report).unwrap();
        tokio::fs::write(
            tmp.path().join(REPORTS_FILE),
            format!("{valid}\nnot json\n"),
        )
        .await
        .unwrap();

        let err = store.reports().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { line: 2, .. }));
    }
}
