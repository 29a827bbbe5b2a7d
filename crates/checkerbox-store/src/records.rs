//! Records handed to the persistence layer at the end of a site run.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic line produced by the coordinator, a runner or a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Who produced the entry (`mainloop`, a device kind, ...)
    pub source: String,
    /// Site the entry belongs to; `None` for coordinator-wide entries
    pub site: Option<usize>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        source: impl Into<String>,
        site: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            source: source.into(),
            site,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(
        source: impl Into<String>,
        site: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogLevel::Info, source, site, message)
    }

    pub fn error(
        source: impl Into<String>,
        site: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogLevel::Error, source, site, message)
    }
}

/// Overall verdict of one site's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => f.write_str("Pass"),
            Verdict::Fail => f.write_str("Fail"),
        }
    }
}

/// Cumulative report of one site's run.
///
/// Appended to by the owning runner only; handed to a
/// [`RecordStore`](crate::RecordStore) once the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// Name of the configuration the run was built from
    pub source: String,
    pub site: usize,
    /// `None` while the run is still in progress
    pub overall: Option<Verdict>,
    /// Timestamped report lines, oldest first
    pub lines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(source: impl Into<String>, site: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            site,
            overall: None,
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a line prefixed with the local wall-clock time.
    pub fn append_line(&mut self, line: impl AsRef<str>) {
        let stamp = Local::now().format("%H:%M:%S");
        self.lines.push(format!("{}: {}", stamp, line.as_ref()));
    }

    pub fn set_overall(&mut self, verdict: Verdict) {
        self.overall = Some(verdict);
    }

    /// The multi-line report text.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines_are_timestamped() {
        let mut report = Report::new("config.toml", 2);
        report.append_line("Sequence Started");
        report.append_line("0 Done Boot: ok (1)");

        assert_eq!(report.lines.len(), 2);
        assert!(report.lines[1].ends_with(": 0 Done Boot: ok (1)"));
        // HH:MM:SS prefix
        assert_eq!(report.lines[0].find(": "), Some(8));
        assert_eq!(report.render().lines().count(), 2);
    }

    #[test]
    fn test_report_overall_starts_unset() {
        let mut report = Report::new("config.toml", 0);
        assert!(report.overall.is_none());
        report.set_overall(Verdict::Fail);
        assert_eq!(report.overall, Some(Verdict::Fail));
    }

    #[test]
    fn test_log_level_serializes_uppercase() {
        let json = serde_json::to_string(&LogLevel::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }
}
