//! Checkerbox Core Library
//!
//! Parallel hardware test-sequence orchestration: a topic-keyed event bus,
//! device handlers (serial, stub, timing), a per-site sequence runner with
//! retry/timeout/abort policy, and the run coordinator tying them together.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod domain;
pub mod event;
pub mod notify;
pub mod obs;
pub mod runner;
pub mod telemetry;

pub use bus::{EventBus, Inbox};

pub use config::{
    load_run_config, AppSettings, DeviceDeclaration, RunConfig, SettingsSource, StepConfig,
    UiEngine,
};

pub use coordinator::{overall_verdict, RunCoordinator};

pub use device::{
    resolve_declaration, Device, DeviceBuild, DeviceReply, DeviceWorker, SerialDevice, SerialLink,
    StubDevice, TimingDevice, SERIAL_KIND, STUB_KIND, TIMING_KIND,
};

pub use domain::{
    CheckerboxError, ConfigError, DeviceInitError, Outcome, Result, StepFault, StepResult,
};

pub use event::{
    ControlEvent, Event, Notification, Payload, SequenceEvent, StepSettings, CONTROL_TOPIC,
    NOTIFICATION_TOPIC, SEQUENCE_TOPIC,
};

pub use notify::Notifier;

pub use runner::{RunPolicy, RunnerContext, RunnerState, SequenceRunner, SiteOutcome};

pub use checkerbox_store::{
    JsonlRecordStore, LogEntry, LogLevel, MemoryRecordStore, RecordStore, Report, Verdict,
};
