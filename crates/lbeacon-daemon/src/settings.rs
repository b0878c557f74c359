//! Locating and loading the configuration file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lbeacon_core::BeaconConfig;
use tracing::info;

/// Environment variable overriding the configuration path.
pub const ENV_CONFIG_PATH: &str = "LBEACON_CONFIG";

/// The configuration path: command line, then `LBEACON_CONFIG`, then the
/// platform default.
#[must_use]
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .filter(|p| !p.trim().is_empty())
        .map_or_else(BeaconConfig::default_path, PathBuf::from)
}

/// Load and validate the configuration at `path`, falling back to defaults
/// when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or fails validation.
pub fn load(path: &Path) -> anyhow::Result<BeaconConfig> {
    let config = BeaconConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    info!(
        path = %path.display(),
        scan_adapter = %config.scan.adapter,
        push_adapters = ?config.push.adapters,
        rssi_threshold = config.scan.rssi_threshold,
        "Configuration loaded"
    );
    Ok(config)
}
