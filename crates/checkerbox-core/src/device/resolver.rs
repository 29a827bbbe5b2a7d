//! Builds devices from hardware declarations.
//!
//! Every problem is collected instead of returned early, so one bad
//! declaration never keeps the rest of the hardware set from coming up.

use serde_json::Value;

use super::{Device, SerialDevice, StubDevice, DEFAULT_BAUD_RATE, SERIAL_KIND, STUB_KIND};
use crate::config::DeviceDeclaration;
use crate::domain::DeviceInitError;

/// Outcome of building one declaration.
pub struct DeviceBuild {
    /// Built device; `None` when a fatal error occurred
    pub device: Option<Box<dyn Device>>,
    /// Parsed site, when the declaration got that far
    pub site: Option<usize>,
    /// Fatal and non-fatal problems, in the order they were found
    pub errors: Vec<DeviceInitError>,
}

impl DeviceBuild {
    fn failed(site: Option<usize>, errors: Vec<DeviceInitError>) -> Self {
        Self {
            device: None,
            site,
            errors,
        }
    }

    pub fn is_built(&self) -> bool {
        self.device.is_some()
    }
}

impl std::fmt::Debug for DeviceBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuild")
            .field("device", &self.device.as_ref().map(|d| d.describe()))
            .field("site", &self.site)
            .field("errors", &self.errors)
            .finish()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_site(declaration: &DeviceDeclaration, sites: usize) -> Result<usize, DeviceInitError> {
    let device = declaration.device.clone();
    let value = declaration
        .settings
        .get("site")
        .ok_or_else(|| DeviceInitError::MissingSite {
            device: device.clone(),
        })?;

    let site = match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| DeviceInitError::InvalidSite {
        device: device.clone(),
        value: value_text(value),
    })?;

    if site >= sites {
        return Err(DeviceInitError::SiteOutOfRange { device, site, sites });
    }
    Ok(site)
}

fn parse_baud_rate(declaration: &DeviceDeclaration) -> Result<u32, DeviceInitError> {
    let value = declaration.settings.get("baudrate");
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|rate| *rate > 0).ok_or_else(|| DeviceInitError::InvalidBaudRate {
        device: declaration.device.clone(),
        value: value.map(value_text).unwrap_or_else(|| "<missing>".to_string()),
        fallback: DEFAULT_BAUD_RATE,
    })
}

/// Build the device a declaration describes.
///
/// `sites` is the configured site count; declarations outside `0..sites` are
/// rejected. Timing devices are implicit and cannot be declared.
pub fn resolve_declaration(declaration: &DeviceDeclaration, sites: usize) -> DeviceBuild {
    let site = match parse_site(declaration, sites) {
        Ok(site) => site,
        Err(err) => return DeviceBuild::failed(None, vec![err]),
    };

    match declaration.device.as_str() {
        SERIAL_KIND => {
            let mut errors = Vec::new();
            let baud_rate = parse_baud_rate(declaration).unwrap_or_else(|err| {
                errors.push(err);
                DEFAULT_BAUD_RATE
            });

            let Some(address) = declaration.settings.get("address").and_then(Value::as_str) else {
                errors.push(DeviceInitError::MissingAddress {
                    device: declaration.device.clone(),
                });
                return DeviceBuild::failed(Some(site), errors);
            };

            match SerialDevice::open(site, address, baud_rate) {
                Ok(device) => DeviceBuild {
                    device: Some(Box::new(device)),
                    site: Some(site),
                    errors,
                },
                Err(err) => {
                    errors.push(err);
                    DeviceBuild::failed(Some(site), errors)
                }
            }
        }
        STUB_KIND => DeviceBuild {
            device: Some(Box::new(StubDevice::new(site))),
            site: Some(site),
            errors: Vec::new(),
        },
        other => DeviceBuild::failed(
            Some(site),
            vec![DeviceInitError::Unsupported {
                device: other.to_string(),
            }],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StepSettings;
    use serde_json::json;

    fn declaration(device: &str, settings: &[(&str, Value)]) -> DeviceDeclaration {
        DeviceDeclaration {
            device: device.to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<StepSettings>(),
        }
    }

    #[test]
    fn test_stub_device_builds() {
        let build = resolve_declaration(&declaration(STUB_KIND, &[("site", json!("1"))]), 2);
        assert!(build.is_built());
        assert_eq!(build.site, Some(1));
        assert!(build.errors.is_empty());
    }

    #[test]
    fn test_site_problems_are_fatal() {
        let build = resolve_declaration(&declaration(STUB_KIND, &[]), 2);
        assert!(!build.is_built());
        assert!(matches!(build.errors[0], DeviceInitError::MissingSite { .. }));

        let build = resolve_declaration(&declaration(STUB_KIND, &[("site", json!("one"))]), 2);
        assert!(matches!(build.errors[0], DeviceInitError::InvalidSite { .. }));

        let build = resolve_declaration(&declaration(STUB_KIND, &[("site", json!(2))]), 2);
        assert_eq!(
            build.errors,
            vec![DeviceInitError::SiteOutOfRange {
                device: STUB_KIND.to_string(),
                site: 2,
                sites: 2,
            }]
        );
    }

    #[test]
    fn test_serial_without_address_collects_every_error() {
        let build = resolve_declaration(
            &declaration(SERIAL_KIND, &[("site", json!(0)), ("baudrate", json!("fast"))]),
            1,
        );
        assert!(!build.is_built());
        assert_eq!(build.errors.len(), 2);
        assert!(!build.errors[0].is_fatal());
        assert!(matches!(build.errors[1], DeviceInitError::MissingAddress { .. }));
    }

    #[test]
    fn test_serial_open_failure_is_reported() {
        let build = resolve_declaration(
            &declaration(
                SERIAL_KIND,
                &[
                    ("site", json!(0)),
                    ("address", json!("/dev/checkerbox-no-such-port")),
                    ("baudrate", json!(9600)),
                ],
            ),
            1,
        );
        assert!(!build.is_built());
        assert!(matches!(build.errors.last(), Some(DeviceInitError::PortOpen { .. })));
    }

    #[test]
    fn test_unknown_and_timing_kinds_are_unsupported() {
        for kind in ["oscilloscope", "sequence"] {
            let build = resolve_declaration(&declaration(kind, &[("site", json!(0))]), 1);
            assert!(!build.is_built());
            assert!(matches!(build.errors[0], DeviceInitError::Unsupported { .. }));
        }
    }
}
