//! Checkerbox-Store: report and log persistence
//!
//! ## Layer 0 - Persistence
//!
//! Runners hand their finished reports to a [`RecordStore`]; every component
//! appends log entries to it. Storage failures are surfaced as
//! [`StorageError`] and never abort a run.
//!
//! ## Key Components
//!
//! - `RecordStore`: async append/read contract
//! - `MemoryRecordStore`: in-memory backend
//! - `JsonlRecordStore`: JSON-lines files under a directory

mod error;
pub mod fakes;
pub mod jsonl;
pub mod records;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryRecordStore;
pub use jsonl::JsonlRecordStore;
pub use records::{LogEntry, LogLevel, Report, Verdict};
pub use storage_traits::{RecordStore, StorageResult};
