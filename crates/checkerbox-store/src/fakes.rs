//! In-memory record store
//!
//! Backs tests and runs started without a store directory.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::records::{LogEntry, Report};
use crate::storage_traits::*;

/// In-memory record store backed by two `Vec`s.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    reports: Mutex<Vec<Report>>,
    logs: Mutex<Vec<LogEntry>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn append_report(&self, report: Report) -> StorageResult<()> {
        self.reports.lock().unwrap().push(report);
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> StorageResult<()> {
        self.logs.lock().unwrap().push(entry);
        Ok(())
    }

    async fn reports(&self) -> StorageResult<Vec<Report>> {
        Ok(self.reports.lock().unwrap().clone())
    }

    async fn logs(&self) -> StorageResult<Vec<LogEntry>> {
        Ok(self.logs.lock().unwrap().clone())
    }
}
