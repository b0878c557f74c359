//! Location advertisement.
//!
//! At startup the beacon advertises its coordinates on the LE adapter in an
//! iBeacon-shaped packet, so phones can locate themselves without pairing.
//! This module builds the advertising data and the host commands that set
//! it; the daemon runs them.

use std::fmt::Write as _;

use crate::config::{AdvertisementConfig, LocationConfig};

/// Size of the HCI LE Set Advertising Data parameter block.
pub const ADVERTISEMENT_LEN: usize = 32;

/// Byte offset of coordinate X (little-endian f32).
pub const X_OFFSET: usize = 22;
/// Byte offset of coordinate Y (little-endian f32).
pub const Y_OFFSET: usize = 26;

/// Significant length, flags, Apple manufacturer data and the beacon UUID
/// prefix. The last 8 UUID bytes carry the coordinates, then TX power.
const TEMPLATE: [u8; ADVERTISEMENT_LEN] = [
    0x1E, 0x02, 0x01, 0x1A, 0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15, 0xE2, 0xC5, 0x6D, 0xB5, 0xDF,
    0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xC8, 0x00,
];

/// OGF for LE controller commands.
const OGF_LE: &str = "0x08";
/// OCF of LE Set Advertising Data.
const OCF_SET_ADVERTISING_DATA: &str = "0x0008";

/// Advertising data for a beacon at `(x, y)`.
#[must_use]
pub fn payload(x: f32, y: f32) -> [u8; ADVERTISEMENT_LEN] {
    let mut data = TEMPLATE;
    data[X_OFFSET..X_OFFSET + 4].copy_from_slice(&x.to_le_bytes());
    data[Y_OFFSET..Y_OFFSET + 4].copy_from_slice(&y.to_le_bytes());
    data
}

/// Space-separated uppercase hex, the form `hcitool cmd` expects.
#[must_use]
pub fn hex_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// One host command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    /// Executable name.
    pub program: &'static str,
    /// Arguments.
    pub args: Vec<String>,
}

impl HostCommand {
    fn new(program: &'static str, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

/// Commands that enable non-connectable advertising, disable page scan and
/// load the location payload, in order. Empty when advertising is disabled.
#[must_use]
pub fn commands(config: &AdvertisementConfig, location: &LocationConfig) -> Vec<HostCommand> {
    if !config.enabled {
        return Vec::new();
    }
    let adapter = config.adapter.as_str();
    let data = payload(location.x, location.y);

    let mut set_data = vec![
        "-i".to_string(),
        adapter.to_string(),
        "cmd".to_string(),
        OGF_LE.to_string(),
        OCF_SET_ADVERTISING_DATA.to_string(),
    ];
    set_data.extend(data.iter().map(|b| format!("{b:02X}")));

    vec![
        HostCommand::new("hciconfig", [adapter, "leadv", "3"]),
        HostCommand::new("hciconfig", [adapter, "noscan"]),
        HostCommand::new("hcitool", set_data),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_embeds_coordinates() {
        let data = payload(1.5, -2.25);
        assert_eq!(&data[..X_OFFSET], &TEMPLATE[..X_OFFSET]);
        assert_eq!(f32::from_le_bytes(data[22..26].try_into().unwrap()), 1.5);
        assert_eq!(f32::from_le_bytes(data[26..30].try_into().unwrap()), -2.25);
        assert_eq!(&data[30..], &[0xC8, 0x00]);
    }

    #[test]
    fn test_zero_location_matches_template() {
        assert_eq!(
            hex_bytes(&payload(0.0, 0.0)),
            "1E 02 01 1A 1A FF 4C 00 02 15 E2 C5 6D B5 DF FB 48 D2 B0 60 D0 F5 \
             00 00 00 00 00 00 00 00 C8 00"
        );
    }

    #[test]
    fn test_commands_target_configured_adapter() {
        let config = AdvertisementConfig {
            enabled: true,
            adapter: "hci0".into(),
        };
        let location = LocationConfig {
            x: 1.0,
            y: 2.0,
            level: "1".into(),
        };

        let cmds = commands(&config, &location);
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].to_string(), "hciconfig hci0 leadv 3");
        assert_eq!(cmds[1].to_string(), "hciconfig hci0 noscan");
        assert_eq!(cmds[2].program, "hcitool");
        assert_eq!(&cmds[2].args[..5], &["-i", "hci0", "cmd", "0x08", "0x0008"]);
        assert_eq!(cmds[2].args.len(), 5 + ADVERTISEMENT_LEN);
        // 1.0f32 is 00 00 80 3F little-endian.
        assert_eq!(&cmds[2].args[5 + X_OFFSET..5 + X_OFFSET + 4], &["00", "00", "80", "3F"]);
    }

    #[test]
    fn test_disabled_advertisement_has_no_commands() {
        let config = AdvertisementConfig {
            enabled: false,
            adapter: "hci0".into(),
        };
        assert!(commands(&config, &LocationConfig::default()).is_empty());
    }
}
