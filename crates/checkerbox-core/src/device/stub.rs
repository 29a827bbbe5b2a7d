//! Stub test device: named no-op actions that always complete.

use async_trait::async_trait;

use super::{Device, DeviceReply, STUB_KIND};
use crate::domain::StepFault;
use crate::event::SequenceEvent;

const ACTIONS: [&str; 3] = ["TestAction1", "TestAction2", "TestAction3"];

#[derive(Debug, Clone)]
pub struct StubDevice {
    site: usize,
}

impl StubDevice {
    pub fn new(site: usize) -> Self {
        Self { site }
    }
}

#[async_trait]
impl Device for StubDevice {
    fn kind(&self) -> &'static str {
        STUB_KIND
    }

    fn site(&self) -> usize {
        self.site
    }

    fn describe(&self) -> String {
        format!("Test device at site {}", self.site)
    }

    async fn resolve(&mut self, step: &SequenceEvent) -> DeviceReply {
        match step.function() {
            Some(action) if ACTIONS.contains(&action) => DeviceReply::done(action),
            Some(other) => StepFault::UnknownFunction {
                function: other.to_string(),
            }
            .into(),
            None => StepFault::MissingFunction.into(),
        }
    }
}
