//! Per-site timing device implementing `Wait` and `WaitRand`.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::{Device, DeviceReply, TIMING_KIND};
use crate::domain::StepFault;
use crate::event::SequenceEvent;

/// Upper bound, in milliseconds, of one `WaitRand` draw before site scaling.
const RANDOM_WAIT_MAX_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct TimingDevice {
    site: usize,
}

impl TimingDevice {
    pub fn new(site: usize) -> Self {
        Self { site }
    }

    async fn wait(millis: u64) -> DeviceReply {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        DeviceReply::done(format!("Wait {millis}mS"))
    }
}

#[async_trait]
impl Device for TimingDevice {
    fn kind(&self) -> &'static str {
        TIMING_KIND
    }

    fn site(&self) -> usize {
        self.site
    }

    fn describe(&self) -> String {
        format!("Sequence device at site {}", self.site)
    }

    async fn resolve(&mut self, step: &SequenceEvent) -> DeviceReply {
        match step.function() {
            Some("Wait") => match step.setting_u64("time") {
                Some(millis) => Self::wait(millis).await,
                None => StepFault::MissingSetting {
                    key: "time".to_string(),
                }
                .into(),
            },
            Some("WaitRand") => {
                // Site 0 never waits.
                let millis =
                    rand::rng().random_range(0..=RANDOM_WAIT_MAX_MS) * self.site as u64;
                Self::wait(millis).await
            }
            Some(other) => StepFault::UnknownFunction {
                function: other.to_string(),
            }
            .into(),
            None => StepFault::MissingFunction.into(),
        }
    }
}
