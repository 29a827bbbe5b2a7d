//! Application settings and sequence configuration loading.
//!
//! Both file kinds are JSON or TOML, chosen by extension. A missing sequence
//! file falls back to a built-in placeholder plan so a fresh install still runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::domain::ConfigError;
use crate::event::{SequenceEvent, StepSettings};

/// Settings file names probed by [`AppSettings::discover`], in order.
pub const APP_SETTINGS_FILES: [&str; 2] = ["app.toml", "app.json"];

const DEFAULT_RETRY: u32 = 1;
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Plan used when the requested sequence file does not exist.
pub const PLACEHOLDER_CONFIG: &str = r#"
[[sequence]]
step_label = "Settle"
device = "sequence"
function = "Wait"
time = 100

[[sequence]]
step_label = "Staggered settle"
device = "sequence"
function = "WaitRand"
"#;

/// Which UI collaborator drives the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiEngine {
    /// Headless: load the default plan, run every site once, exit
    #[default]
    None,
    /// Line-oriented console relaying control commands
    Console,
}

fn default_sites() -> usize {
    1
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_config_name() -> String {
    "config.toml".to_string()
}

fn default_inbox_capacity() -> usize {
    64
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Number of sites, numbered `0..sites`
    #[serde(default = "default_sites")]
    pub sites: usize,
    #[serde(default, alias = "uiengine")]
    pub ui_engine: UiEngine,
    /// Directory `CONFIGPICK` names are resolved against
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Sequence file loaded at startup, relative to `config_dir`
    #[serde(default = "default_config_name")]
    pub default_config: String,
    /// JSON-lines store directory; in-memory when unset
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    /// Capacity of every device inbox
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            sites: default_sites(),
            ui_engine: UiEngine::default(),
            config_dir: default_config_dir(),
            default_config: default_config_name(),
            store_dir: None,
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl AppSettings {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = match read_optional(path)? {
            Some(text) => parse_by_extension::<AppSettings>(path, &text)?,
            None => {
                info!(path = %path.display(), "No settings file, using defaults");
                AppSettings::default()
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load the first of [`APP_SETTINGS_FILES`] present in `dir`, else defaults.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        match Self::locate(dir) {
            Some(path) => Self::load(&path),
            None => Ok(AppSettings::default()),
        }
    }

    /// First of [`APP_SETTINGS_FILES`] present in `dir`.
    pub fn locate(dir: &Path) -> Option<PathBuf> {
        APP_SETTINGS_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sites == 0 {
            return Err(ConfigError::Invalid("sites must be at least 1".to_string()));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of a named sequence file inside `config_dir`.
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }
}

/// Settings file re-read on every `CONFIGPICK`.
///
/// Command-line overrides are reapplied after each reload. The store
/// directory never changes once the store is open.
#[derive(Debug, Clone)]
pub struct SettingsSource {
    pub path: PathBuf,
    pub sites: Option<usize>,
}

impl SettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sites: None,
        }
    }

    pub fn with_sites(mut self, sites: Option<usize>) -> Self {
        self.sites = sites;
        self
    }

    /// Read the file again on top of `current`.
    pub fn reload(&self, current: &AppSettings) -> Result<AppSettings, ConfigError> {
        let mut settings = AppSettings::load(&self.path)?;
        if let Some(sites) = self.sites {
            settings.sites = sites;
        }
        settings.store_dir = current.store_dir.clone();
        settings.validate()?;
        Ok(settings)
    }
}

/// One hardware entry: a device kind plus free-form settings (`site`, `address`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDeclaration {
    pub device: String,
    #[serde(flatten)]
    pub settings: StepSettings,
}

impl DeviceDeclaration {
    /// Raw `site` value as written, for notifications about failed builds.
    pub fn site_hint(&self) -> Option<usize> {
        match self.settings.get("site")? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Accepts a non-negative integer written either as a number or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(u64),
    Text(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {s:?}"))),
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let n = lenient_u64(deserializer)?;
    u32::try_from(n).map_err(|_| serde::de::Error::custom(format!("{n} is out of range")))
}

fn default_retry() -> u32 {
    DEFAULT_RETRY
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// One entry of the sequence plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(alias = "label")]
    pub step_label: String,
    #[serde(default)]
    pub device: String,
    /// Attempt budget; zero is treated as one
    #[serde(default = "default_retry", deserialize_with = "lenient_u32")]
    pub retry: u32,
    /// Per-attempt deadline in milliseconds
    #[serde(default = "default_timeout_ms", deserialize_with = "lenient_u64")]
    pub timeout: u64,
    /// Function-specific settings (`function`, `time`, `threshold`, `data`, ...)
    #[serde(flatten)]
    pub settings: StepSettings,
}

/// A loaded sequence configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// File name the plan came from; becomes the report source
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub hardware: Vec<DeviceDeclaration>,
    #[serde(default)]
    pub sequence: Vec<StepConfig>,
}

impl RunConfig {
    /// The built-in plan used when no sequence file exists.
    pub fn placeholder() -> Result<Self, ConfigError> {
        let mut config: RunConfig =
            toml::from_str(PLACEHOLDER_CONFIG).map_err(|source| ConfigError::Toml {
                path: PathBuf::from("<placeholder>"),
                source,
            })?;
        config.name = "placeholder".to_string();
        Ok(config)
    }

    /// Replicate the plan for `site`. Step ids are plan positions.
    pub fn plan_for_site(&self, site: usize) -> VecDeque<SequenceEvent> {
        self.sequence
            .iter()
            .enumerate()
            .map(|(id, step)| SequenceEvent {
                id,
                label: step.step_label.clone(),
                device: step.device.clone(),
                site,
                retry: step.retry.max(1),
                timeout: Duration::from_millis(step.timeout),
                settings: step.settings.clone(),
            })
            .collect()
    }
}

/// Load a sequence configuration; a missing file yields the placeholder plan.
pub fn load_run_config(path: &Path) -> Result<RunConfig, ConfigError> {
    ensure_supported(path)?;
    let Some(text) = read_optional(path)? else {
        warn!(path = %path.display(), "Sequence file not found, loading placeholder config");
        return RunConfig::placeholder();
    };

    let mut config: RunConfig = parse_by_extension(path, &text)?;
    config.name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    info!(
        path = %path.display(),
        devices = config.hardware.len(),
        steps = config.sequence.len(),
        "Sequence configuration loaded"
    );
    Ok(config)
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Option<Format> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "json" => Some(Format::Json),
        "toml" => Some(Format::Toml),
        _ => None,
    }
}

fn ensure_supported(path: &Path) -> Result<(), ConfigError> {
    format_of(path).map(|_| ()).ok_or_else(|| ConfigError::UnsupportedFormat {
        path: path.to_path_buf(),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_by_extension<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, ConfigError> {
    match format_of(path) {
        Some(Format::Json) => serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        Some(Format::Toml) => toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        None => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}
