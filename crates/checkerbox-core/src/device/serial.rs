//! Generic serial device: `Read`, `Write` and `Send-Receive` over a byte link.
//!
//! The link is any blocking `Read + Write` stream. Production devices open a
//! port with `serialport`; tests plug in an in-memory link. Blocking I/O runs
//! on the blocking pool so the device loop never stalls a runtime worker.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Device, DeviceReply, SERIAL_KIND};
use crate::domain::{DeviceInitError, StepFault};
use crate::event::SequenceEvent;

/// Baud rate used when a declaration omits or garbles it.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const READ_BUFFER_LEN: usize = 128;
const PORT_TIMEOUT: Duration = Duration::from_millis(1000);
const SEND_RECEIVE_GRACE: Duration = Duration::from_millis(20);

/// Blocking byte stream a serial device talks over.
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

pub struct SerialDevice {
    site: usize,
    address: String,
    link: SharedLink,
}

impl SerialDevice {
    /// Open `address` at `baud_rate` with a one-second read timeout.
    pub fn open(site: usize, address: &str, baud_rate: u32) -> Result<Self, DeviceInitError> {
        let port = serialport::new(address, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| DeviceInitError::PortOpen {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_link(site, address, port))
    }

    /// Wrap an already-open link.
    pub fn with_link<L>(site: usize, address: impl Into<String>, link: L) -> Self
    where
        L: SerialLink + 'static,
    {
        Self {
            site,
            address: address.into(),
            link: Arc::new(Mutex::new(Box::new(link))),
        }
    }

    async fn with_port<T, F>(&self, op: F) -> Result<T, StepFault>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialLink) -> std::io::Result<T> + Send + 'static,
    {
        let link = Arc::clone(&self.link);
        tokio::task::spawn_blocking(move || {
            let mut guard = link.lock().map_err(|_| StepFault::LinkUnavailable)?;
            op(&mut **guard).map_err(StepFault::from)
        })
        .await
        .map_err(|_| StepFault::LinkUnavailable)?
    }

    async fn read(&self, step: &SequenceEvent) -> DeviceReply {
        let received = self
            .with_port(|port| {
                let mut buf = [0u8; READ_BUFFER_LEN];
                let n = port.read(&mut buf)?;
                Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
            })
            .await;

        let received = match received {
            Ok(text) => text,
            Err(fault) => return fault.into(),
        };
        let message = format!("Rx: {received}");

        match step.setting_text("threshold") {
            None => DeviceReply::done(message),
            Some(threshold) if threshold.trim() == received.trim() => DeviceReply::pass(message),
            Some(_) => DeviceReply::fail(message),
        }
    }

    async fn write(&self, step: &SequenceEvent) -> DeviceReply {
        let Some(data) = step.setting_text("data") else {
            return StepFault::MissingSetting {
                key: "data".to_string(),
            }
            .into();
        };

        let payload = data.clone().into_bytes();
        match self
            .with_port(move |port| {
                port.write_all(&payload)?;
                port.flush()
            })
            .await
        {
            Ok(()) => DeviceReply::done(format!("Tx: {data}")),
            Err(fault) => fault.into(),
        }
    }

    async fn send_receive(&self, step: &SequenceEvent) -> DeviceReply {
        let written = self.write(step).await;
        if written.outcome.is_failure() {
            return written;
        }
        tokio::time::sleep(SEND_RECEIVE_GRACE).await;
        self.read(step).await
    }
}

#[async_trait]
impl Device for SerialDevice {
    fn kind(&self) -> &'static str {
        SERIAL_KIND
    }

    fn site(&self) -> usize {
        self.site
    }

    fn describe(&self) -> String {
        format!("GenericUart device on {} for site {}", self.address, self.site)
    }

    async fn resolve(&mut self, step: &SequenceEvent) -> DeviceReply {
        match step.function() {
            Some("Read") => self.read(step).await,
            Some("Write") => self.write(step).await,
            Some("Send-Receive") => self.send_receive(step).await,
            Some(other) => StepFault::UnknownFunction {
                function: other.to_string(),
            }
            .into(),
            None => StepFault::MissingFunction.into(),
        }
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("site", &self.site)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
