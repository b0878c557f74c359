//! Shared identifier types.
//!
//! These are the keys that flow between the scanner, the dispatch pool, the
//! push workers and the gateway link.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::is_valid_mac_address;
use crate::error::{BeaconError, Result};

/// Canonical form of a 48-bit Bluetooth hardware address.
///
/// Always stored as upper-case `XX:XX:XX:XX:XX:XX`, so two identities compare
/// equal exactly when they name the same radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Parse a textual address, accepting either `:` or `-` separators.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidDeviceAddress`] if the text is not a
    /// 48-bit hardware address.
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        if !is_valid_mac_address(trimmed) {
            return Err(BeaconError::InvalidDeviceAddress(address.to_string()));
        }
        Ok(Self(trimmed.replace('-', ":").to_ascii_uppercase()))
    }

    /// Build an identity from the raw address bytes, most significant first.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(
            bytes
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceIdentity {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = BeaconError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceIdentity> for String {
    fn from(id: DeviceIdentity) -> Self {
        id.0
    }
}

/// Index of a physical push adapter (0 = adapter A, 1 = adapter B, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(pub usize);

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Adapters are labelled A, B, ... in diagnostics.
        match u8::try_from(self.0) {
            Ok(n) if n < 26 => write!(f, "{}", char::from(b'A' + n)),
            _ => write!(f, "#{}", self.0),
        }
    }
}

/// 64-bit address of a peer on the control radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayAddress(pub [u8; 8]);

impl GatewayAddress {
    /// The control-radio broadcast address.
    pub const BROADCAST: Self = Self([0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
}

impl fmt::Display for GatewayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_canonical() {
        let a = DeviceIdentity::parse("aa:bb:cc:dd:ee:01").unwrap();
        let b = DeviceIdentity::parse("AA-BB-CC-DD-EE-01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn test_identity_rejects_garbage() {
        assert!(DeviceIdentity::parse("not-an-address").is_err());
        assert!(DeviceIdentity::parse("AA:BB:CC:DD:EE").is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<DeviceIdentity>().is_err());
    }

    #[test]
    fn test_identity_from_bytes() {
        let id = DeviceIdentity::from_bytes([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn test_adapter_labels() {
        assert_eq!(AdapterId(0).to_string(), "A");
        assert_eq!(AdapterId(1).to_string(), "B");
        assert_eq!(AdapterId(40).to_string(), "#40");
    }

    #[test]
    fn test_gateway_address_display() {
        assert_eq!(GatewayAddress::BROADCAST.to_string(), "000000000000FFFF");
    }
}
