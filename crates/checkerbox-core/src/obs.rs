//! Structured observability hooks for sequence lifecycle events.
//!
//! This module provides:
//! - Site-scoped tracing spans via [`site_span`], attached to runner futures
//! - Emission functions for key lifecycle events: device init, sequence
//!   start/finish, step dispatch/finish
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::{info, warn};

use crate::domain::{Outcome, StepResult};

/// Span tagged with the site id.
///
/// ```ignore
/// runner.run().instrument(site_span(2)).await;
/// ```
pub fn site_span(site: usize) -> tracing::Span {
    tracing::info_span!("checkerbox.site", site = site)
}

/// Emit event: a hardware declaration was built or rejected.
pub fn emit_device_init(kind: &str, site: Option<usize>, built: bool, errors: usize) {
    if built {
        info!(event = "device.init", kind = %kind, site = ?site, built, errors);
    } else {
        warn!(event = "device.init", kind = %kind, site = ?site, built, errors);
    }
}

/// Emit event: a runner started working through its plan.
pub fn emit_sequence_started(site: usize, source: &str, steps: usize) {
    info!(event = "sequence.started", site, source = %source, steps);
}

/// Emit event: one attempt of a step was published.
pub fn emit_step_dispatched(site: usize, step_id: usize, label: &str, attempt: u32) {
    info!(event = "step.dispatched", site, step_id, label = %label, attempt);
}

/// Emit event: one attempt of a step resolved.
pub fn emit_step_finished(result: &StepResult) {
    info!(
        event = "step.finished",
        site = result.site,
        step_id = result.id,
        outcome = %result.outcome,
        retried = result.retried,
        message = %result.message,
    );
}

/// Emit event: a runner ended, with its overall outcome.
pub fn emit_sequence_finished(site: usize, outcome: Outcome, duration_ms: u64, aborted: bool) {
    info!(
        event = "sequence.finished",
        site,
        outcome = %outcome,
        duration_ms,
        aborted,
    );
}

/// Emit event: a record could not be persisted (warning level).
pub fn emit_store_error(what: &str, error: &dyn std::fmt::Display) {
    warn!(event = "store.error", what = %what, error = %error);
}
