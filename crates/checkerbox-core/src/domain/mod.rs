//! Domain model: step outcomes and the error taxonomy.

pub mod error;
pub mod result;

pub use error::{CheckerboxError, ConfigError, DeviceInitError, Result, StepFault};
pub use result::{Outcome, StepResult};
