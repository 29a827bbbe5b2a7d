//! Fan-out of notifications, log entries and reports.
//!
//! Every externally visible fact goes through a [`Notifier`]: it is published
//! on the bus for UI collaborators, mirrored to `tracing`, and persisted when
//! it is a log entry or report. Store failures are logged, never propagated.

use std::sync::Arc;

use checkerbox_store::{LogEntry, LogLevel, RecordStore, Report};
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::event::{Event, Notification};
use crate::obs;

#[derive(Clone)]
pub struct Notifier {
    bus: Arc<EventBus>,
    store: Arc<dyn RecordStore>,
}

impl Notifier {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn RecordStore>) -> Self {
        Self { bus, store }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish a notification to UI subscribers.
    pub async fn emit(&self, notification: Notification) {
        self.bus.publish(Event::notification(notification)).await;
    }

    /// Persist a log entry and publish it as `debugInfo`.
    pub async fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => {
                info!(source = %entry.source, site = ?entry.site, "{}", entry.message)
            }
            LogLevel::Warning => {
                warn!(source = %entry.source, site = ?entry.site, "{}", entry.message)
            }
            LogLevel::Error => {
                error!(source = %entry.source, site = ?entry.site, "{}", entry.message)
            }
        }

        if let Err(e) = self.store.append_log(entry.clone()).await {
            obs::emit_store_error("log", &e);
        }
        self.emit(Notification::DebugInfo(entry)).await;
    }

    /// Hand a finished site report to the store.
    pub async fn persist_report(&self, report: Report) {
        let site = report.site;
        if let Err(e) = self.store.append_report(report).await {
            obs::emit_store_error("report", &e);
        } else {
            info!(site, "Report stored");
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NOTIFICATION_TOPIC;
    use checkerbox_store::MemoryRecordStore;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_log_is_persisted_and_published() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryRecordStore::new());
        let (ui_tx, mut ui_rx) = mpsc::channel(4);
        bus.subscribe(NOTIFICATION_TOPIC, ui_tx).await;

        let notifier = Notifier::new(bus, store.clone());
        notifier
            .log(LogEntry::info("mainloop", Some(0), "Configuration loading started"))
            .await;

        let logs = store.logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "Configuration loading started");

        let event = ui_rx.recv().await.unwrap();
        match event.as_notification() {
            Some(Notification::DebugInfo(entry)) => assert_eq!(entry.site, Some(0)),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persist_report() {
        let store = Arc::new(MemoryRecordStore::new());
        let notifier = Notifier::new(Arc::new(EventBus::new()), store.clone());
        notifier.persist_report(Report::new("config.toml", 1)).await;
        assert_eq!(store.reports().await.unwrap()[0].site, 1);
    }
}
