//! Sequence runner behaviour against live device workers on a real bus.
//!
//! Each test wires a bus, one or more device workers, and a UI inbox, then
//! drives `SequenceRunner::run` and inspects results, notifications and the
//! bus traffic itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkerbox_core::{
    Device, DeviceReply, DeviceWorker, Event, EventBus, MemoryRecordStore, Notification, Notifier,
    Outcome, RecordStore, RunPolicy, RunnerContext, RunnerState, SequenceEvent, SequenceRunner,
    StepSettings, StubDevice, TimingDevice, Verdict, NOTIFICATION_TOPIC, SEQUENCE_TOPIC,
    STUB_KIND, TIMING_KIND,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Harness
// ===========================================================================

/// Device answering from a fixed script and recording every step it resolved.
struct ScriptedDevice {
    site: usize,
    replies: VecDeque<DeviceReply>,
    seen: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Device for ScriptedDevice {
    fn kind(&self) -> &'static str {
        STUB_KIND
    }

    fn site(&self) -> usize {
        self.site
    }

    async fn resolve(&mut self, step: &SequenceEvent) -> DeviceReply {
        self.seen.lock().unwrap().push(step.id);
        self.replies
            .pop_front()
            .unwrap_or_else(|| DeviceReply::done("unscripted"))
    }
}

/// Device that accepts steps and never answers.
struct SilentDevice {
    site: usize,
}

#[async_trait]
impl Device for SilentDevice {
    fn kind(&self) -> &'static str {
        STUB_KIND
    }

    fn site(&self) -> usize {
        self.site
    }

    async fn resolve(&mut self, _step: &SequenceEvent) -> DeviceReply {
        std::future::pending().await
    }
}

struct Harness {
    bus: Arc<EventBus>,
    store: Arc<MemoryRecordStore>,
    ctx: RunnerContext,
    cancel: CancellationToken,
    ui_rx: mpsc::Receiver<Event>,
    wire_rx: mpsc::Receiver<Event>,
}

impl Harness {
    async fn new(permissive: bool) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryRecordStore::new());
        let (ui_tx, ui_rx) = mpsc::channel(1024);
        let (wire_tx, wire_rx) = mpsc::channel(1024);
        bus.subscribe(NOTIFICATION_TOPIC, ui_tx).await;
        bus.subscribe(SEQUENCE_TOPIC, wire_tx).await;

        let notifier = Notifier::new(Arc::clone(&bus), store.clone());
        let ctx = RunnerContext::new(notifier, Arc::new(RunPolicy::new(permissive)));
        Self {
            bus,
            store,
            ctx,
            cancel: CancellationToken::new(),
            ui_rx,
            wire_rx,
        }
    }

    async fn attach(&self, device: impl Device) {
        let worker = DeviceWorker::new(Box::new(device), 16);
        self.bus.subscribe(SEQUENCE_TOPIC, worker.inbox()).await;
        tokio::spawn(worker.run_loop(self.cancel.child_token()));
    }

    fn runner(&self, site: usize, plan: Vec<SequenceEvent>) -> SequenceRunner {
        SequenceRunner::new(site, "config.toml", VecDeque::from(plan), self.ctx.clone())
    }

    fn notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(event) = self.ui_rx.try_recv() {
            if let Some(n) = event.as_notification() {
                out.push(n.clone());
            }
        }
        out
    }

    /// Step ids published on the sequence topic, in order.
    fn published(&mut self) -> Vec<usize> {
        let mut out = Vec::new();
        while let Ok(event) = self.wire_rx.try_recv() {
            if let Some(step) = event.as_sequence() {
                out.push(step.id);
            }
        }
        out
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn step(id: usize, device: &str, site: usize, retry: u32, timeout_ms: u64) -> SequenceEvent {
    SequenceEvent {
        id,
        label: format!("Step {id}"),
        device: device.to_string(),
        site,
        retry,
        timeout: Duration::from_millis(timeout_ms),
        settings: StepSettings::new(),
    }
}

fn with_function(mut step: SequenceEvent, function: &str) -> SequenceEvent {
    step.settings.insert("function".to_string(), json!(function));
    step
}

fn scripted(site: usize, replies: Vec<DeviceReply>) -> (ScriptedDevice, Arc<Mutex<Vec<usize>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (
        ScriptedDevice {
            site,
            replies: VecDeque::from(replies),
            seen: Arc::clone(&seen),
        },
        seen,
    )
}

fn test_results(notifications: &[Notification]) -> Vec<checkerbox_core::StepResult> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::TestResult(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

fn sequence_ends(notifications: &[Notification]) -> Vec<(Outcome, usize)> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::SequenceEnd { outcome, site } => Some((*outcome, *site)),
            _ => None,
        })
        .collect()
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn test_single_stub_step_passes() {
    let mut h = Harness::new(false).await;
    h.attach(StubDevice::new(0)).await;

    let plan = vec![with_function(step(0, STUB_KIND, 0, 1, 1000), "TestAction1")];
    let outcome = h.runner(0, plan).run().await;

    assert_eq!(outcome.verdict, Verdict::Pass);
    assert_eq!(outcome.state, RunnerState::CompletedPass);
    // Header plus one step entry.
    assert_eq!(outcome.report.lines.len(), 2);
    assert!(outcome.report.lines[1].ends_with("0 Done Step 0: TestAction1 (1)"));

    let notes = h.notifications();
    assert_eq!(sequence_ends(&notes), vec![(Outcome::Pass, 0)]);

    let reports = h.store.reports().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].overall, Some(Verdict::Pass));
}

#[tokio::test]
async fn test_fail_is_retried_until_pass() {
    let mut h = Harness::new(false).await;
    let (device, seen) = scripted(
        0,
        vec![
            DeviceReply::fail("Rx: 2.9"),
            DeviceReply::fail("Rx: 3.0"),
            DeviceReply::pass("Rx: 3.3"),
        ],
    );
    h.attach(device).await;

    let outcome = h.runner(0, vec![step(0, STUB_KIND, 0, 3, 1000)]).run().await;
    assert_eq!(outcome.verdict, Verdict::Pass);
    assert_eq!(*seen.lock().unwrap(), vec![0, 0, 0]);

    let notes = h.notifications();
    let results = test_results(&notes);
    let retried: Vec<u32> = results.iter().map(|r| r.retried).collect();
    assert_eq!(retried, vec![0, 1, 2]);
    assert_eq!(results[2].outcome, Outcome::Pass);
    assert!(outcome.report.lines[1].ends_with("0 Pass Step 0: Rx: 3.3 (3)"));
    assert_eq!(sequence_ends(&notes), vec![(Outcome::Pass, 0)]);
}

#[tokio::test]
async fn test_exhausted_retries_keep_last_fail() {
    let mut h = Harness::new(false).await;
    let (device, seen) = scripted(
        0,
        vec![DeviceReply::fail("low"), DeviceReply::fail("still low")],
    );
    h.attach(device).await;

    let outcome = h.runner(0, vec![step(0, STUB_KIND, 0, 2, 1000)]).run().await;
    assert_eq!(outcome.state, RunnerState::AbortedFail);
    assert_eq!(seen.lock().unwrap().len(), 2);

    let results = test_results(&h.notifications());
    assert_eq!(results.last().map(|r| r.retried), Some(1));
    assert!(results.iter().all(|r| r.retried < 2));
}

#[tokio::test]
async fn test_error_is_never_retried() {
    let mut h = Harness::new(false).await;
    let (device, seen) = scripted(0, vec![DeviceReply::error("Function not found: X")]);
    h.attach(device).await;

    let outcome = h.runner(0, vec![step(0, STUB_KIND, 0, 5, 1000)]).run().await;
    assert_eq!(outcome.verdict, Verdict::Fail);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(test_results(&h.notifications()).len(), 1);
}

#[tokio::test]
async fn test_strict_mode_stops_after_error() {
    let mut h = Harness::new(false).await;
    let (device, seen) = scripted(
        0,
        vec![
            DeviceReply::done("ok"),
            DeviceReply::error("boom"),
            DeviceReply::done("never"),
        ],
    );
    h.attach(device).await;

    let plan = (0..3).map(|id| step(id, STUB_KIND, 0, 1, 1000)).collect();
    let outcome = h.runner(0, plan).run().await;

    assert_eq!(outcome.state, RunnerState::AbortedFail);
    assert_eq!(h.published(), vec![0, 1]);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(sequence_ends(&h.notifications()), vec![(Outcome::Fail, 0)]);
    assert_eq!(outcome.report.lines.len(), 3);
}

#[tokio::test]
async fn test_permissive_mode_runs_every_step() {
    let mut h = Harness::new(true).await;
    let (device, seen) = scripted(
        0,
        vec![
            DeviceReply::done("ok"),
            DeviceReply::error("boom"),
            DeviceReply::done("after"),
        ],
    );
    h.attach(device).await;

    let plan = (0..3).map(|id| step(id, STUB_KIND, 0, 1, 1000)).collect();
    let outcome = h.runner(0, plan).run().await;

    assert_eq!(outcome.state, RunnerState::CompletedFail);
    assert_eq!(outcome.verdict, Verdict::Fail);
    assert_eq!(h.published(), vec![0, 1, 2]);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    // Header plus three step entries.
    assert_eq!(outcome.report.lines.len(), 4);
    assert_eq!(sequence_ends(&h.notifications()), vec![(Outcome::Fail, 0)]);
}

#[tokio::test]
async fn test_permissive_mode_passes_clean_plan() {
    let mut h = Harness::new(true).await;
    let (device, _) = scripted(
        0,
        vec![DeviceReply::done("ok"), DeviceReply::pass("in range")],
    );
    h.attach(device).await;

    let plan = (0..2).map(|id| step(id, STUB_KIND, 0, 1, 1000)).collect();
    let outcome = h.runner(0, plan).run().await;

    assert_eq!(outcome.state, RunnerState::CompletedPass);
    assert_eq!(outcome.verdict, Verdict::Pass);
    assert_eq!(outcome.report.lines.len(), 3);
    assert_eq!(sequence_ends(&h.notifications()), vec![(Outcome::Pass, 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out() {
    let mut h = Harness::new(false).await;
    h.attach(SilentDevice { site: 0 }).await;

    let start = Instant::now();
    let outcome = h.runner(0, vec![step(0, STUB_KIND, 0, 1, 100)]).run().await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(200));
    assert_eq!(outcome.verdict, Verdict::Fail);

    let results = test_results(&h.notifications());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::Error);
    assert_eq!(results[0].message, "Timeout");
    assert_eq!(results[0].retried, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sites_run_in_parallel() {
    let mut h = Harness::new(false).await;
    h.attach(TimingDevice::new(0)).await;
    h.attach(TimingDevice::new(1)).await;

    let wait = |site| {
        let mut s = with_function(step(0, TIMING_KIND, site, 1, 1000), "Wait");
        s.settings.insert("time".to_string(), json!(200));
        s
    };

    let start = Instant::now();
    let first = tokio::spawn(h.runner(0, vec![wait(0)]).run());
    let second = tokio::spawn(h.runner(1, vec![wait(1)]).run());
    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    let elapsed = start.elapsed();

    assert_eq!(first.verdict, Verdict::Pass);
    assert_eq!(second.verdict, Verdict::Pass);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(250));

    let mut ends = sequence_ends(&h.notifications());
    ends.sort_by_key(|(_, site)| *site);
    assert_eq!(ends, vec![(Outcome::Pass, 0), (Outcome::Pass, 1)]);
}

#[tokio::test]
async fn test_step_logs_follow_attempts() {
    let mut h = Harness::new(false).await;
    let (device, _) = scripted(0, vec![DeviceReply::fail("low"), DeviceReply::pass("ok")]);
    h.attach(device).await;

    h.runner(0, vec![step(0, STUB_KIND, 0, 2, 1000)]).run().await;
    let messages: Vec<String> = h
        .store
        .logs()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();

    assert_eq!(
        messages,
        vec![
            "Step 0| Test started",
            "Step 0|Test finished with result: low On retry: 0",
            "Step 0| Test started",
            "Step 0|Test finished with result: ok On retry: 1",
        ]
    );

    // Started notifications carry an in-progress placeholder.
    let started: Vec<Outcome> = h
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::TestStarted(r) => Some(r.outcome),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![Outcome::InProgress, Outcome::InProgress]);
}
