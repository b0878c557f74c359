//! # lbeacon
//!
//! Location beacon daemon. Watches for nearby phones, pushes the location
//! file to each of them once per dedup window, advertises the beacon's
//! coordinates and answers the gateway on the control radio.
//!
//! ## Running
//!
//! ```bash
//! # Development, without radios
//! cargo run --package lbeacon-daemon --no-default-features --features mock-bluetooth
//!
//! # On the beacon
//! LBEACON_ENV=production ./lbeacon /etc/lbeacon/config.toml
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use lbeacon_daemon::{logging, runtime, settings};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting lbeacon");

    let path = settings::config_path(std::env::args().nth(1));
    let config = settings::load(&path)?;

    runtime::run(config).await.map_err(|e| {
        error!(error = %format!("{e:#}"), "lbeacon stopped");
        e
    })?;

    info!("lbeacon stopped");
    Ok(())
}
