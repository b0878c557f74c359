//! Beacon configuration management.
//!
//! Handles loading, saving, and validating the beacon configuration:
//! - Scan adapter and RSSI threshold
//! - Push adapters, slot layout and the file to deliver
//! - Dedup window and janitor cadence
//! - Beacon location (advertised coordinates)
//! - Control radio serial port
//!
//! Two on-disk formats are accepted. A `.conf` file is read as the legacy
//! six-line positional `key=value` format written by the deployment tools;
//! anything else is read as TOML through the `config` crate, with
//! `LBEACON__SECTION__KEY` environment variables layered on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::PushFile;

/// Prefix for environment overrides of TOML settings.
pub const ENV_PREFIX: &str = "LBEACON";

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("MAC address regex is valid")
});

/// Returns `true` if `address` looks like `XX:XX:XX:XX:XX:XX` (or with `-`).
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file contents are not valid configuration.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(String),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `scan.rssi_threshold`.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main beacon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Device discovery settings.
    pub scan: ScanConfig,
    /// Object push settings.
    pub push: PushConfig,
    /// Dedup window settings.
    pub dedup: DedupConfig,
    /// Where this beacon is installed.
    pub location: LocationConfig,
    /// Control radio settings.
    pub gateway: GatewayConfig,
    /// LE location advertisement settings.
    pub advertisement: AdvertisementConfig,
}

/// Device discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Adapter used for inquiry.
    pub adapter: String,

    /// Detections must be strictly stronger than this (dBm).
    pub rssi_threshold: i16,

    /// Length of one inquiry session in seconds.
    pub session_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            adapter: "hci1".to_string(),
            rssi_threshold: -60,
            // Inquiry length 0x30 in 1.28 s units.
            session_secs: 61,
        }
    }
}

impl ScanConfig {
    /// Session length as a [`Duration`].
    #[must_use]
    pub const fn session_length(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }
}

/// Object push settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Push adapters in slot order: slots `[0, slots_per_adapter)` use the
    /// first adapter, the next block the second, and so on.
    pub adapters: Vec<String>,

    /// Concurrent pushes each adapter may carry.
    pub slots_per_adapter: usize,

    /// Directory holding the file to push.
    pub file_path: PathBuf,

    /// Name of the file to push.
    pub file_name: String,

    /// RFCOMM channel of the target's object push service.
    pub obex_channel: u8,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            adapters: vec!["hci2".to_string(), "hci3".to_string()],
            slots_per_adapter: 9,
            file_path: PathBuf::from("/home/pi"),
            file_name: "location.txt".to_string(),
            obex_channel: 12,
        }
    }
}

impl PushConfig {
    /// Total number of push slots.
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.adapters.len() * self.slots_per_adapter
    }

    /// The file every push delivers.
    #[must_use]
    pub fn file(&self) -> PushFile {
        PushFile::new(self.file_path.join(&self.file_name), self.file_name.clone())
    }
}

/// Dedup window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum number of tracked devices.
    pub capacity: usize,

    /// How long a served device stays ineligible, in milliseconds.
    pub timeout_ms: u64,

    /// How often the janitor sweeps expired entries, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            timeout_ms: 20_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl DedupConfig {
    /// Dedup window as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Janitor cadence as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Where this beacon is installed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Floor / level label.
    pub level: String,
}

/// Control radio settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serial device of the XBee module.
    pub serial_port: String,
    /// Serial baud rate.
    pub baud_rate: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// LE location advertisement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisementConfig {
    /// Whether to start advertising at boot.
    pub enabled: bool,
    /// Adapter used for LE advertising.
    pub adapter: String,
}

impl Default for AdvertisementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adapter: "hci0".to_string(),
        }
    }
}

impl BeaconConfig {
    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// read/parse error if it cannot be used.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        if path.extension().is_some_and(|ext| ext == "conf") {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;
            let mut config = Self::default();
            legacy::parse(&content).apply_to(&mut config);
            return Ok(config);
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => {
                tracing::warn!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &'static str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field,
                    message: message.to_string(),
                });
            }
        };

        check(!self.scan.adapter.trim().is_empty(), "scan.adapter", "must not be empty");
        check(
            (-127..=20).contains(&self.scan.rssi_threshold),
            "scan.rssi_threshold",
            "must be between -127 and 20 dBm",
        );
        check(self.scan.session_secs > 0, "scan.session_secs", "must be positive");
        check(!self.push.adapters.is_empty(), "push.adapters", "at least one push adapter is required");
        check(
            self.push.adapters.iter().all(|a| !a.trim().is_empty()),
            "push.adapters",
            "adapter names must not be empty",
        );
        check(self.push.slots_per_adapter > 0, "push.slots_per_adapter", "must be at least 1");
        check(!self.push.file_name.trim().is_empty(), "push.file_name", "must not be empty");
        check(
            (1..=30).contains(&self.push.obex_channel),
            "push.obex_channel",
            "RFCOMM channels are 1-30",
        );
        check(self.dedup.capacity > 0, "dedup.capacity", "must be at least 1");
        check(self.dedup.timeout_ms > 0, "dedup.timeout_ms", "must be positive");
        check(self.dedup.sweep_interval_ms > 0, "dedup.sweep_interval_ms", "must be positive");
        check(self.location.x.is_finite(), "location.x", "must be a finite number");
        check(self.location.y.is_finite(), "location.y", "must be a finite number");
        check(self.gateway.baud_rate > 0, "gateway.baud_rate", "must be positive");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        // On the beacon: /etc/lbeacon/config.toml
        // For development: ~/.config/lbeacon/config.toml
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/lbeacon/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "lbeacon").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

/// The six-line positional format used by the deployment tools.
///
/// ```text
/// filepath=/home/pi/
/// filename=location.txt
/// coordinate_X=12.5
/// coordinate_Y=-3.25
/// level=3F
/// RSSI_coverage=-55
/// ```
///
/// Keys are ignored; the value is everything after the first `=`.
pub mod legacy {
    use std::path::PathBuf;

    use super::BeaconConfig;

    /// Values read from a legacy file. `None` keeps the default.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct LegacyConfig {
        /// Line 1.
        pub file_path: Option<String>,
        /// Line 2.
        pub file_name: Option<String>,
        /// Line 3.
        pub coordinate_x: Option<String>,
        /// Line 4.
        pub coordinate_y: Option<String>,
        /// Line 5.
        pub level: Option<String>,
        /// Line 6.
        pub rssi_coverage: Option<String>,
    }

    /// Parse the positional lines. Lines without `=` leave their slot empty.
    #[must_use]
    pub fn parse(contents: &str) -> LegacyConfig {
        let mut values = contents.lines().map(|line| {
            line.split_once('=')
                .map(|(_, value)| value.trim_end_matches(['\r', '\n']).to_string())
                .filter(|value| !value.is_empty())
        });

        LegacyConfig {
            file_path: values.next().flatten(),
            file_name: values.next().flatten(),
            coordinate_x: values.next().flatten(),
            coordinate_y: values.next().flatten(),
            level: values.next().flatten(),
            rssi_coverage: values.next().flatten(),
        }
    }

    impl LegacyConfig {
        /// Overlay the parsed values onto `config`.
        ///
        /// Unparseable numbers are logged and leave the default in place.
        pub fn apply_to(&self, config: &mut BeaconConfig) {
            if let Some(path) = &self.file_path {
                config.push.file_path = PathBuf::from(path.trim());
            }
            if let Some(name) = &self.file_name {
                config.push.file_name = name.trim().to_string();
            }
            if let Some(x) = parse_number(self.coordinate_x.as_deref(), "coordinate_X") {
                config.location.x = x;
            }
            if let Some(y) = parse_number(self.coordinate_y.as_deref(), "coordinate_Y") {
                config.location.y = y;
            }
            if let Some(level) = &self.level {
                config.location.level = level.trim().to_string();
            }
            if let Some(rssi) = parse_number(self.rssi_coverage.as_deref(), "RSSI_coverage") {
                config.scan.rssi_threshold = rssi;
            }
        }
    }

    fn parse_number<T: std::str::FromStr>(value: Option<&str>, key: &str) -> Option<T> {
        let value = value?.trim();
        let parsed = value.parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value, "Ignoring unparseable legacy config value");
        }
        parsed
    }
}
