//! Per-site sequence runner.
//!
//! A [`SequenceRunner`] owns one site's step queue, its private result
//! mailbox, and its report. It dispatches one step at a time, retries `Fail`
//! outcomes up to the step's budget, synthesizes `Error("Timeout")` when a
//! device stays silent, and applies the strict/permissive failure policy.
//!
//! ## State machine
//!
//! ```text
//! Idle -> Running(i) -> Running(i+1) | AttemptRetry(i) | AbortedFail | CompletedPass | CompletedFail
//! ```
//!
//! ## Rules
//! - At most one result is in flight per site.
//! - Only `Fail` earns another attempt; `Pass`, `Done` and `Error` end the step.
//! - Strict mode discards the rest of the queue on the first `Fail`/`Error`.
//! - Exactly one `sequenceEnd` is emitted per run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use checkerbox_store::{LogEntry, LogLevel, Report, Verdict};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{Outcome, StepFault, StepResult};
use crate::event::{Event, Notification, ResultSender, SequenceEvent};
use crate::notify::Notifier;
use crate::obs;

/// Source name used for runner log entries.
pub const RUNNER_SOURCE: &str = "mainloop";

const MAILBOX_CAPACITY: usize = 16;

/// Shared strict/permissive switch, read by every runner.
#[derive(Debug, Default)]
pub struct RunPolicy {
    no_error: AtomicBool,
}

impl RunPolicy {
    pub fn new(permissive: bool) -> Self {
        Self {
            no_error: AtomicBool::new(permissive),
        }
    }

    /// Whether failing steps let the run continue.
    pub fn is_permissive(&self) -> bool {
        self.no_error.load(Ordering::SeqCst)
    }

    pub fn set_permissive(&self, permissive: bool) {
        self.no_error.store(permissive, Ordering::SeqCst);
    }

    /// Flip the mode and return the new value.
    pub fn toggle(&self) -> bool {
        !self.no_error.fetch_xor(true, Ordering::SeqCst)
    }
}

/// Where a runner is in its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    /// Step with this id is being attempted
    Running(usize),
    /// Step with this id failed and is about to be attempted again
    AttemptRetry(usize),
    AbortedFail,
    CompletedPass,
    CompletedFail,
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::AbortedFail | RunnerState::CompletedPass | RunnerState::CompletedFail
        )
    }
}

/// Collaborators shared by every runner of one runtime set.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub notifier: Notifier,
    pub policy: Arc<RunPolicy>,
    /// Serializes "publish step + notifications" across sites. Never held while awaiting a result.
    pub order_lock: Arc<Mutex<()>>,
}

impl RunnerContext {
    pub fn new(notifier: Notifier, policy: Arc<RunPolicy>) -> Self {
        Self {
            notifier,
            policy,
            order_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Final state of one site's run.
#[derive(Debug, Clone)]
pub struct SiteOutcome {
    pub site: usize,
    pub verdict: Verdict,
    pub state: RunnerState,
    pub report: Report,
}

pub struct SequenceRunner {
    site: usize,
    queue: VecDeque<SequenceEvent>,
    ctx: RunnerContext,
    state: RunnerState,
    failed: bool,
    report: Report,
    results_tx: ResultSender,
    results_rx: mpsc::Receiver<StepResult>,
}

impl SequenceRunner {
    /// `source` names the configuration the plan came from.
    pub fn new(
        site: usize,
        source: impl Into<String>,
        queue: VecDeque<SequenceEvent>,
        ctx: RunnerContext,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(MAILBOX_CAPACITY);
        Self {
            site,
            queue,
            ctx,
            state: RunnerState::Idle,
            failed: false,
            report: Report::new(source, site),
            results_tx,
            results_rx,
        }
    }

    /// Work through the queue and hand the report to the store.
    pub async fn run(mut self) -> SiteOutcome {
        let started = Instant::now();
        obs::emit_sequence_started(self.site, &self.report.source, self.queue.len());
        self.report.append_line("Sequence Started");

        while let Some(step) = self.queue.pop_front() {
            self.state = RunnerState::Running(step.id);
            let result = self.execute(&step).await;
            self.report.append_line(result.report_line());

            if !result.outcome.is_failure() {
                continue;
            }
            self.failed = true;
            if !self.ctx.policy.is_permissive() {
                debug!(
                    site = self.site,
                    step_id = step.id,
                    discarded = self.queue.len(),
                    "Strict mode, aborting remaining steps"
                );
                self.queue.clear();
                self.state = RunnerState::AbortedFail;
                break;
            }
        }

        if !self.state.is_terminal() {
            self.state = if self.failed {
                RunnerState::CompletedFail
            } else {
                RunnerState::CompletedPass
            };
        }

        let verdict = if self.failed {
            Verdict::Fail
        } else {
            Verdict::Pass
        };
        self.report.set_overall(verdict);

        self.ctx
            .notifier
            .emit(Notification::SequenceEnd {
                outcome: verdict.into(),
                site: self.site,
            })
            .await;
        obs::emit_sequence_finished(
            self.site,
            verdict.into(),
            started.elapsed().as_millis() as u64,
            self.state == RunnerState::AbortedFail,
        );
        self.ctx.notifier.persist_report(self.report.clone()).await;

        SiteOutcome {
            site: self.site,
            verdict,
            state: self.state,
            report: self.report,
        }
    }

    /// Attempt `step` until it passes, errors, or exhausts its budget.
    async fn execute(&mut self, step: &SequenceEvent) -> StepResult {
        let mut attempt = 0;
        loop {
            self.drain_stale();
            self.dispatch(step, attempt).await;

            let mut result = self.await_result(step).await;
            result.retried = attempt;
            self.finish_attempt(step, &result).await;

            attempt += 1;
            if result.outcome.ends_attempts() || attempt >= step.retry {
                return result;
            }
            self.state = RunnerState::AttemptRetry(step.id);
        }
    }

    /// Discard results left over from earlier timed-out attempts.
    fn drain_stale(&mut self) {
        while let Ok(stale) = self.results_rx.try_recv() {
            debug!(
                site = self.site,
                step_id = stale.id,
                outcome = %stale.outcome,
                "Discarding late result"
            );
        }
    }

    async fn dispatch(&self, step: &SequenceEvent, attempt: u32) {
        let notifier = &self.ctx.notifier;
        let _order = self.ctx.order_lock.lock().await;

        let delivered = notifier
            .bus()
            .publish(Event::sequence(step.clone(), self.results_tx.clone()))
            .await;
        if delivered == 0 {
            warn!(site = self.site, step_id = step.id, "No device subscribed to sequence events");
        }

        notifier
            .emit(Notification::TestStarted(StepResult::in_progress(step)))
            .await;
        notifier
            .log(LogEntry::info(
                RUNNER_SOURCE,
                Some(self.site),
                format!("{}| Test started", step.label),
            ))
            .await;
        obs::emit_step_dispatched(self.site, step.id, &step.label, attempt);
    }

    /// Wait for this step's result until its deadline.
    async fn await_result(&mut self, step: &SequenceEvent) -> StepResult {
        let deadline = Instant::now() + step.timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(result)) if result.id == step.id => return result,
                Ok(Some(other)) => {
                    debug!(
                        site = self.site,
                        expected = step.id,
                        got = other.id,
                        "Discarding result for another step"
                    );
                }
                // The runner holds a sender, so the mailbox only closes on teardown.
                Ok(None) | Err(_) => return StepResult::from_fault(step, StepFault::Timeout),
            }
        }
    }

    async fn finish_attempt(&self, step: &SequenceEvent, result: &StepResult) {
        let notifier = &self.ctx.notifier;
        let _order = self.ctx.order_lock.lock().await;

        notifier.emit(Notification::TestResult(result.clone())).await;
        let level = if result.outcome == Outcome::Error {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        notifier
            .log(LogEntry::new(
                level,
                step.device.clone(),
                Some(self.site),
                format!(
                    "{}|Test finished with result: {} On retry: {}",
                    result.label, result.message, result.retried
                ),
            ))
            .await;
        obs::emit_step_finished(result);
    }
}

impl std::fmt::Debug for SequenceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRunner")
            .field("site", &self.site)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .finish()
    }
}
