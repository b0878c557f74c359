//! Unified error types for the beacon core library.
//!
//! [`BeaconError`] covers every failure mode of the beacon. Codec and
//! configuration modules keep their own narrow error types
//! ([`ConfigError`](crate::config::ConfigError),
//! [`ObexError`](crate::obex::ObexError),
//! [`FrameError`](crate::xbee::FrameError)) and convert into it.
//!
//! The variants fall into the four classes the runtime cares about:
//!
//! - **Fatal hardware**: an adapter cannot be opened, filtered or commanded.
//!   The owning loop stops and the failure is surfaced.
//! - **Transient I/O**: a single read hiccup. The loop continues.
//! - **Push failure**: one step of an object push failed. Logged, the
//!   attempt is abandoned, the slot is still released.
//! - **Configuration**: the beacon cannot start with the given settings.
//!
//! Capacity exhaustion (no idle slot, full dedup cache) is not an error at
//! all; those paths return `None`.

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // HARDWARE ERRORS
    // =========================================================================
    /// A radio adapter could not be opened or powered.
    #[error("Adapter '{adapter}' is unavailable: {message}. Check that the dongle is plugged in and up (hciconfig).")]
    AdapterUnavailable {
        /// Adapter name, e.g. `hci1`.
        adapter: String,
        /// Underlying failure.
        message: String,
    },

    /// The inquiry could not be configured or started.
    #[error("Failed to start device inquiry: {0}")]
    ScanSetupFailed(String),

    /// A single read from the inquiry failed; the next read may succeed.
    #[error("Inquiry read failed: {0}")]
    ScanReadFailed(String),

    /// The control radio could not be opened or stopped delivering frames.
    #[error("Control radio failure: {0}")]
    ControlRadioFailed(String),

    // =========================================================================
    // PUSH ERRORS
    // =========================================================================
    /// The push adapter could not be opened for this attempt.
    #[error("Failed to open push adapter {adapter}: {message}")]
    PushOpenFailed {
        /// Adapter label.
        adapter: String,
        /// Underlying failure.
        message: String,
    },

    /// The target does not offer the object push service.
    #[error("Device {0} does not offer the object push service")]
    PushChannelNotFound(String),

    /// Connecting to the target's push channel failed.
    #[error("Failed to connect to {device}: {message}")]
    PushConnectFailed {
        /// Target device address.
        device: String,
        /// Underlying failure.
        message: String,
    },

    /// The file transfer itself failed.
    #[error("Failed to push file to {device}: {message}")]
    PushTransferFailed {
        /// Target device address.
        device: String,
        /// Underlying failure.
        message: String,
    },

    /// The OBEX session could not be torn down cleanly.
    #[error("Failed to disconnect from {device}: {message}")]
    PushDisconnectFailed {
        /// Target device address.
        device: String,
        /// Underlying failure.
        message: String,
    },

    /// The peer violated the object exchange protocol.
    #[error("OBEX protocol error: {0}")]
    ObexProtocol(String),

    // =========================================================================
    // GATEWAY ERRORS
    // =========================================================================
    /// A reply or connection to the gateway could not be delivered.
    #[error("Failed to reach gateway {gateway}: {message}")]
    GatewayUnreachable {
        /// Gateway address in hex.
        gateway: String,
        /// Underlying failure.
        message: String,
    },

    /// A control-radio frame was malformed.
    #[error("Invalid control frame: {0}")]
    InvalidControlFrame(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A device address was not a 48-bit hardware address.
    #[error("Invalid device address: '{0}'. Expected format 'XX:XX:XX:XX:XX:XX'.")]
    InvalidDeviceAddress(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Short alias used throughout the crate.
pub type Error = BeaconError;

impl BeaconError {
    /// Returns `true` if this error must stop the loop that produced it.
    #[inline]
    #[must_use]
    pub const fn is_fatal_hardware(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnavailable { .. } | Self::ScanSetupFailed(_) | Self::ControlRadioFailed(_)
        )
    }

    /// Returns `true` if the operation can simply be retried on the next
    /// loop iteration.
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ScanReadFailed(_) | Self::InvalidControlFrame(_))
    }

    /// Returns `true` if this error came out of an object push attempt.
    #[inline]
    #[must_use]
    pub const fn is_push_failure(&self) -> bool {
        matches!(
            self,
            Self::PushOpenFailed { .. }
                | Self::PushChannelNotFound(_)
                | Self::PushConnectFailed { .. }
                | Self::PushTransferFailed { .. }
                | Self::PushDisconnectFailed { .. }
                | Self::ObexProtocol(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::InvalidDeviceAddress(_)
        )
    }

    /// Returns a machine-readable error code for log aggregation.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable { .. } => "ADAPTER_UNAVAILABLE",
            Self::ScanSetupFailed(_) => "SCAN_SETUP_FAILED",
            Self::ScanReadFailed(_) => "SCAN_READ_FAILED",
            Self::ControlRadioFailed(_) => "CONTROL_RADIO_FAILED",
            Self::PushOpenFailed { .. } => "PUSH_OPEN_FAILED",
            Self::PushChannelNotFound(_) => "PUSH_CHANNEL_NOT_FOUND",
            Self::PushConnectFailed { .. } => "PUSH_CONNECT_FAILED",
            Self::PushTransferFailed { .. } => "PUSH_TRANSFER_FAILED",
            Self::PushDisconnectFailed { .. } => "PUSH_DISCONNECT_FAILED",
            Self::ObexProtocol(_) => "OBEX_PROTOCOL",
            Self::GatewayUnreachable { .. } => "GATEWAY_UNREACHABLE",
            Self::InvalidControlFrame(_) => "INVALID_CONTROL_FRAME",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::InvalidDeviceAddress(_) => "INVALID_DEVICE_ADDRESS",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => Self::ConfigParseError(format!(
                "Failed to read {}: {}",
                path.display(),
                source
            )),
            ConfigError::WriteError { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {}", path.display(), source),
            )),
            ConfigError::ParseError(message) | ConfigError::SerializeError(message) => {
                Self::ConfigParseError(message)
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::obex::ObexError> for BeaconError {
    fn from(err: crate::obex::ObexError) -> Self {
        use crate::obex::ObexError;
        match err {
            ObexError::Io(e) => Self::IoError(e),
            other => Self::ObexProtocol(other.to_string()),
        }
    }
}

impl From<crate::xbee::FrameError> for BeaconError {
    fn from(err: crate::xbee::FrameError) -> Self {
        Self::InvalidControlFrame(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_fatal_hardware_classification() {
        assert!(BeaconError::AdapterUnavailable {
            adapter: "hci1".into(),
            message: "no such device".into()
        }
        .is_fatal_hardware());
        assert!(BeaconError::ScanSetupFailed("filter".into()).is_fatal_hardware());
        assert!(BeaconError::ControlRadioFailed("tty gone".into()).is_fatal_hardware());

        assert!(!BeaconError::ScanReadFailed("eintr".into()).is_fatal_hardware());
    }

    #[test]
    fn test_transient_classification() {
        assert!(BeaconError::ScanReadFailed("short read".into()).is_transient());
        assert!(BeaconError::InvalidControlFrame("checksum".into()).is_transient());
        assert!(!BeaconError::ScanSetupFailed("filter".into()).is_transient());
    }

    #[test]
    fn test_push_failure_classification() {
        assert!(BeaconError::PushChannelNotFound("AA:BB:CC:DD:EE:01".into()).is_push_failure());
        assert!(BeaconError::PushTransferFailed {
            device: "AA:BB:CC:DD:EE:01".into(),
            message: "refused".into()
        }
        .is_push_failure());
        assert!(BeaconError::ObexProtocol("bad opcode".into()).is_push_failure());
        assert!(!BeaconError::ScanReadFailed("x".into()).is_push_failure());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconError::ConfigNotFound(PathBuf::from("/etc/lbeacon")).is_config_error());
        assert!(BeaconError::InvalidDeviceAddress("zz".into()).is_config_error());
        assert!(!BeaconError::IoError(IoErr::new(ErrorKind::Other, "x")).is_config_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BeaconError::ScanSetupFailed("x".into()).error_code(),
            "SCAN_SETUP_FAILED"
        );
        assert_eq!(
            BeaconError::PushChannelNotFound("x".into()).error_code(),
            "PUSH_CHANNEL_NOT_FOUND"
        );
        assert_eq!(
            BeaconError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: BeaconError = IoErr::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, BeaconError::IoError(_)));
    }

    #[test]
    fn test_from_obex_error() {
        let err: BeaconError = crate::obex::ObexError::UnexpectedResponse {
            operation: "CONNECT",
            code: 0xC3,
        }
        .into();
        assert!(err.is_push_failure());
        assert!(err.to_string().contains("CONNECT"));
    }

    #[test]
    fn test_error_display_messages() {
        let err = BeaconError::AdapterUnavailable {
            adapter: "hci2".into(),
            message: "down".into(),
        };
        assert!(err.to_string().contains("hci2"));

        let err = BeaconError::InvalidDeviceAddress("nope".into());
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
