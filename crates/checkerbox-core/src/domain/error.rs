//! Error taxonomy for Checkerbox.
//!
//! Only configuration failures at process start are fatal. Device
//! construction failures are collected per declaration, and step-level
//! faults become `Error` outcomes that feed the retry/abort policy.

use std::path::PathBuf;

use checkerbox_store::StorageError;

/// Errors produced while loading settings or a sequence configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("file extension doesn't match any supported type: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors produced while building a device from its declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceInitError {
    #[error("missing site for {device}")]
    MissingSite { device: String },

    #[error("unable to parse site for {device}: {value}")]
    InvalidSite { device: String, value: String },

    #[error("site {site} of {device} is outside the configured {sites} site(s)")]
    SiteOutOfRange {
        device: String,
        site: usize,
        sites: usize,
    },

    #[error("unable to parse baudrate for {device}: {value}, using default of {fallback}")]
    InvalidBaudRate {
        device: String,
        value: String,
        fallback: u32,
    },

    #[error("unable to parse address for {device}")]
    MissingAddress { device: String },

    #[error("cannot open port {address}: {reason}")]
    PortOpen { address: String, reason: String },

    #[error("specified device not supported: {device}")]
    Unsupported { device: String },
}

impl DeviceInitError {
    /// Whether this error keeps the device out of the runtime set.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeviceInitError::InvalidBaudRate { .. })
    }
}

/// Step-level faults. These never escape a device; they become `Error` results.
#[derive(Debug, thiserror::Error)]
pub enum StepFault {
    #[error("Error parsing function name")]
    MissingFunction,

    #[error("Function not found: {function}")]
    UnknownFunction { function: String },

    #[error("Missing or invalid step setting: {key}")]
    MissingSetting { key: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("serial link unavailable")]
    LinkUnavailable,

    #[error("Timeout")]
    Timeout,
}

/// Umbrella error for coordinator and binary entry points.
#[derive(Debug, thiserror::Error)]
pub enum CheckerboxError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for Checkerbox operations.
pub type Result<T> = std::result::Result<T, CheckerboxError>;
