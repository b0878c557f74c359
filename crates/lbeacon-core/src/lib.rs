//! # lbeacon-core
//!
//! Core logic for the LBeacon location beacon.
//!
//! A beacon watches for nearby phones on one radio and pushes a small
//! location file to each of them over two others, while a coordinating
//! gateway supervises it over a serial control radio.
//!
//! This crate provides:
//! - The discovery, dedup, dispatch and push pipeline
//! - The gateway control link state machine
//! - Configuration loading, including the legacy six-line format
//! - Wire codecs for OBEX Object Push and XBee API frames
//!
//! ## Architecture
//!
//! - [`scanner`] - Inquiry loop offering strong detections to the pool
//! - [`pool`] - Fixed slot table and admission into it
//! - [`dedup`] - Time-windowed registry of recently served devices
//! - [`janitor`] - Background eviction of expired dedup entries
//! - [`worker`] - One object push attempt per admitted device
//! - [`gateway`] - Control link to the gateway
//! - [`hardware`] - Traits the logic uses to reach the radios
//! - `bluetooth` - BlueZ implementation of the scan and push traits
//! - [`obex`] - OBEX Object Push client
//! - [`xbee`] - XBee API frame codec
//! - [`advertisement`] - Location advertisement payload
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared identifiers

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertisement;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod hardware;
pub mod janitor;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod obex;
pub mod pool;
pub mod scanner;
pub mod types;
pub mod worker;
pub mod xbee;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::{BluetoothPushTransport, BluetoothScanSource};
pub use config::{is_valid_mac_address, BeaconConfig, ConfigError, ConfigResult};
pub use dedup::{DedupCache, SharedDedupCache};
pub use error::{BeaconError, Error, Result};
pub use gateway::{ControlCommand, ControlPacket, GatewayLink, LinkState};
pub use hardware::{ControlConnection, ControlRadio, Detection, PushLink, PushTransport, ScanEvent, ScanSource};
pub use janitor::CacheJanitor;
pub use pool::{DispatchPool, SlotHandle, SlotStatus, SlotTable};
pub use scanner::{DeviceScanner, SessionSummary};
pub use types::{AdapterId, DeviceIdentity, GatewayAddress};
pub use worker::{PushFile, PushOutcome, PushStep};
