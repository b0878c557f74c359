//! # lbeacon-daemon
//!
//! Process-level plumbing for the LBeacon daemon: logging, configuration
//! lookup, the serial control radio, the location advertisement and the
//! task wiring around [`lbeacon_core`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod advertise;
pub mod logging;
pub mod runtime;
pub mod settings;
pub mod xbee_radio;
