//! Event envelope and typed payloads carried by the [`EventBus`](crate::bus::EventBus).
//!
//! Three payload families share one envelope:
//! - [`SequenceEvent`] - a step dispatched by a runner, answered by one device
//! - [`ControlEvent`] - external start/quit/reconfigure/no-error signals
//! - [`Notification`] - UI/observability stream (`deviceInit`, `testStarted`, ...)

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use checkerbox_store::LogEntry;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{Outcome, StepResult};

/// Topic carrying step dispatches to devices.
pub const SEQUENCE_TOPIC: &str = "SequenceEvent";

/// Topic carrying UI/observability notifications.
pub const NOTIFICATION_TOPIC: &str = "graphicEvent";

/// Topic carrying control signals.
pub const CONTROL_TOPIC: &str = "ControlEvent";

/// Function-specific step settings (`function`, `time`, `threshold`, `data`, ...).
pub type StepSettings = BTreeMap<String, Value>;

/// Private result destination of one runner.
pub type ResultSender = mpsc::Sender<StepResult>;

/// One step of a site's plan.
///
/// Created once when the plan is built; never mutated after enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceEvent {
    /// Position in the site's plan
    pub id: usize,
    pub label: String,
    /// Device kind expected to answer (`genericuart`, `testdevice`, `sequence`)
    pub device: String,
    pub site: usize,
    /// Attempt budget, at least 1
    pub retry: u32,
    pub timeout: Duration,
    pub settings: StepSettings,
}

impl SequenceEvent {
    /// Name of the device function this step invokes.
    pub fn function(&self) -> Option<&str> {
        self.settings.get("function").and_then(Value::as_str)
    }

    /// A setting rendered as text; numbers and booleans are stringified.
    pub fn setting_text(&self, key: &str) -> Option<String> {
        match self.settings.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// A non-negative integer setting, given either as a number or a numeric string.
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        match self.settings.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// External control signal relayed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Spawn one runner per site
    Start,
    /// Stop accepting further signals
    Quit,
    /// Tear down and rebuild from the named configuration
    ConfigPick(String),
    /// Toggle permissive (no-error) mode
    NoError,
}

impl FromStr for ControlEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        match command.as_str() {
            "start" => Ok(ControlEvent::Start),
            "quit" | "exit" => Ok(ControlEvent::Quit),
            "noerror" => Ok(ControlEvent::NoError),
            "config" | "configpick" => match parts.next() {
                Some(name) => Ok(ControlEvent::ConfigPick(name.to_string())),
                None => Err("config requires a configuration name".to_string()),
            },
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// Externally visible notification for UI and logging collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DeviceInit {
        outcome: Outcome,
        site: Option<usize>,
        label: String,
    },
    /// Attempt dispatched; carries an `InProgress` placeholder result
    TestStarted(StepResult),
    TestResult(StepResult),
    SequenceEnd {
        outcome: Outcome,
        site: usize,
    },
    DebugInfo(LogEntry),
}

/// Payload variants carried by an [`Event`].
#[derive(Debug, Clone)]
pub enum Payload {
    Sequence(SequenceEvent),
    Control(ControlEvent),
    Notification(Notification),
}

/// Bus envelope.
///
/// `reply` is only set on [`SEQUENCE_TOPIC`] envelopes and points at the
/// dispatching runner's result mailbox.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub reply: Option<ResultSender>,
    pub payload: Payload,
}

impl Event {
    pub fn sequence(step: SequenceEvent, reply: ResultSender) -> Self {
        Self {
            topic: SEQUENCE_TOPIC.to_string(),
            reply: Some(reply),
            payload: Payload::Sequence(step),
        }
    }

    pub fn notification(notification: Notification) -> Self {
        Self {
            topic: NOTIFICATION_TOPIC.to_string(),
            reply: None,
            payload: Payload::Notification(notification),
        }
    }

    pub fn control(control: ControlEvent) -> Self {
        Self {
            topic: CONTROL_TOPIC.to_string(),
            reply: None,
            payload: Payload::Control(control),
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceEvent> {
        match &self.payload {
            Payload::Sequence(step) => Some(step),
            _ => None,
        }
    }

    pub fn as_notification(&self) -> Option<&Notification> {
        match &self.payload {
            Payload::Notification(n) => Some(n),
            _ => None,
        }
    }
}
