//! Storage trait definitions for Checkerbox
//!
//! `RecordStore` is the persistence collaborator of a run: runners hand it
//! their finished [`Report`], and every component appends [`LogEntry`] lines.
//! Implementations are async and backend-agnostic; an in-memory fake lives
//! in the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{LogEntry, Report};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Append-only store of run reports and log entries.
///
/// Guarantees:
/// - Records are returned in the order they were appended.
/// - Appending never rewrites an earlier record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a completed site report.
    async fn append_report(&self, report: Report) -> StorageResult<()>;

    /// Persist a single log entry.
    async fn append_log(&self, entry: LogEntry) -> StorageResult<()>;

    /// All reports, oldest first.
    async fn reports(&self) -> StorageResult<Vec<Report>>;

    /// All log entries, oldest first.
    async fn logs(&self) -> StorageResult<Vec<LogEntry>>;
}
