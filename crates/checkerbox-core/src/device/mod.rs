//! Device capability and the worker loop that connects a device to the bus.
//!
//! A [`Device`] only knows how to resolve a step into a [`DeviceReply`].
//! [`DeviceWorker`] owns the device's inbox, drops every event not addressed
//! to the device's `(kind, site)` identity, and writes exactly one
//! [`StepResult`] to the dispatching runner's mailbox per accepted event.

pub mod resolver;
pub mod serial;
pub mod stub;
pub mod timing;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bus::Inbox;
use crate::domain::{Outcome, StepFault, StepResult};
use crate::event::{Event, SequenceEvent};

pub use resolver::{resolve_declaration, DeviceBuild};
pub use serial::{SerialDevice, SerialLink, DEFAULT_BAUD_RATE};
pub use stub::StubDevice;
pub use timing::TimingDevice;

/// Wire name of the generic serial device.
pub const SERIAL_KIND: &str = "genericuart";
/// Wire name of the stub test device.
pub const STUB_KIND: &str = "testdevice";
/// Wire name of the per-site timing device.
pub const TIMING_KIND: &str = "sequence";

/// Outcome and message produced by a device for one step attempt.
///
/// The worker stamps site, id and label before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReply {
    pub outcome: Outcome,
    pub message: String,
}

impl DeviceReply {
    pub fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(Outcome::Done, message)
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(Outcome::Pass, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Outcome::Fail, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Outcome::Error, message)
    }
}

impl From<StepFault> for DeviceReply {
    fn from(fault: StepFault) -> Self {
        Self::error(fault.to_string())
    }
}

/// A test-station instrument addressed by `(kind, site)`.
#[async_trait]
pub trait Device: Send + 'static {
    /// Device kind matched against [`SequenceEvent::device`].
    fn kind(&self) -> &'static str;

    /// Site this device serves.
    fn site(&self) -> usize;

    /// Diagnostic identity string.
    fn describe(&self) -> String {
        format!("{} device at site {}", self.kind(), self.site())
    }

    /// Run the step's function. Faults are reported as `Error` replies.
    async fn resolve(&mut self, step: &SequenceEvent) -> DeviceReply;
}

/// Owns a device, its bounded inbox, and the consume-and-dispatch loop.
pub struct DeviceWorker {
    device: Box<dyn Device>,
    inbox_tx: Inbox,
    inbox_rx: mpsc::Receiver<Event>,
}

impl DeviceWorker {
    pub fn new(device: Box<dyn Device>, capacity: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity.max(1));
        Self {
            device,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Message destination to subscribe on the bus.
    pub fn inbox(&self) -> Inbox {
        self.inbox_tx.clone()
    }

    pub fn describe(&self) -> String {
        self.device.describe()
    }

    /// Consume the inbox until `cancel` fires or every sender is gone.
    pub async fn run_loop(self, cancel: CancellationToken) {
        let DeviceWorker {
            mut device,
            inbox_tx,
            mut inbox_rx,
        } = self;
        // Only the bus keeps the inbox alive from here on.
        drop(inbox_tx);

        let kind = device.kind();
        let site = device.site();
        debug!(kind, site, "Device loop started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbox_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(step) = event.as_sequence() else {
                continue;
            };
            if step.device != kind || step.site != site {
                trace!(
                    kind,
                    site,
                    step_device = %step.device,
                    step_site = step.site,
                    "Ignoring step for another device"
                );
                continue;
            }
            let Some(reply_to) = event.reply.as_ref() else {
                continue;
            };

            let reply = tokio::select! {
                _ = cancel.cancelled() => break,
                reply = device.resolve(step) => reply,
            };

            let result = StepResult::for_step(step, reply.outcome, reply.message);
            if reply_to.send(result).await.is_err() {
                debug!(kind, site, step_id = step.id, "Runner mailbox closed; result dropped");
            }
        }

        debug!(kind, site, "Device loop stopped");
    }
}

impl std::fmt::Debug for DeviceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWorker")
            .field("device", &self.device.describe())
            .finish()
    }
}
