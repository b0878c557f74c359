//! BlueZ backend for the scan and push adapters.
//!
//! - [`BluetoothScanSource`] runs classic inquiry on the scan adapter and
//!   reports every device BlueZ adds during a session, with its RSSI.
//! - [`BluetoothPushTransport`] opens RFCOMM links from a push adapter and
//!   runs the OBEX Object Push exchange over them.

use std::time::Duration;

use bluer::rfcomm::{Socket, SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BeaconConfig, PushConfig, ScanConfig};
use crate::error::{BeaconError, Result};
use crate::hardware::{Detection, PushLink, PushTransport, ScanEvent, ScanSource};
use crate::obex::ObexClient;
use crate::types::{AdapterId, DeviceIdentity};
use crate::worker::PushFile;

/// Service class UUID of OBEX Object Push (0x1105).
pub const OBEX_OBJECT_PUSH_UUID: Uuid = Uuid::from_u128(0x0000_1105_0000_1000_8000_0080_5f9b_34fb);

fn to_address(identity: &DeviceIdentity) -> Result<Address> {
    identity
        .as_str()
        .parse()
        .map_err(|_| BeaconError::InvalidDeviceAddress(identity.to_string()))
}

async fn open_adapter(session: &Session, name: &str) -> Result<Adapter> {
    let unavailable = |e: bluer::Error| BeaconError::AdapterUnavailable {
        adapter: name.to_string(),
        message: e.to_string(),
    };
    let adapter = session.adapter(name).map_err(unavailable)?;
    adapter.set_powered(true).await.map_err(unavailable)?;
    Ok(adapter)
}

// =============================================================================
// SCAN
// =============================================================================

/// Inquiry on the scan adapter, split into fixed-length sessions.
pub struct BluetoothScanSource {
    adapter: Adapter,
    session_length: Duration,
    events: Option<BoxStream<'static, AdapterEvent>>,
    deadline: Instant,
}

impl BluetoothScanSource {
    /// Open and power the scan adapter.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::AdapterUnavailable`] if BlueZ cannot be reached
    /// or the adapter does not exist.
    pub async fn new(session: &Session, config: &ScanConfig) -> Result<Self> {
        let adapter = open_adapter(session, &config.adapter).await?;
        info!(adapter = %config.adapter, "Scan adapter ready");
        Ok(Self {
            adapter,
            session_length: config.session_length(),
            events: None,
            deadline: Instant::now(),
        })
    }

    /// Forget cached devices so the next session reports them again.
    async fn forget_devices(&self) {
        let Ok(addresses) = self.adapter.device_addresses().await else {
            return;
        };
        for address in addresses {
            let connected = match self.adapter.device(address) {
                Ok(device) => device.is_connected().await.unwrap_or(true),
                Err(_) => true,
            };
            if !connected {
                if let Err(e) = self.adapter.remove_device(address).await {
                    debug!(%address, error = %e, "Could not forget device");
                }
            }
        }
    }
}

impl ScanSource for BluetoothScanSource {
    async fn start_session(&mut self) -> Result<()> {
        // Dropping the previous stream stops the previous discovery.
        self.events = None;
        self.forget_devices().await;

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::BrEdr,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(|e| BeaconError::ScanSetupFailed(e.to_string()))?;
        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BeaconError::ScanSetupFailed(e.to_string()))?;

        self.events = Some(events.boxed());
        self.deadline = Instant::now() + self.session_length;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<ScanEvent> {
        loop {
            let Some(events) = self.events.as_mut() else {
                return Ok(ScanEvent::SessionComplete);
            };
            let event = match tokio::time::timeout_at(self.deadline, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => {
                    self.events = None;
                    return Ok(ScanEvent::SessionComplete);
                }
            };

            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            let device = self
                .adapter
                .device(address)
                .map_err(|e| BeaconError::ScanReadFailed(e.to_string()))?;
            let rssi = device
                .rssi()
                .await
                .map_err(|e| BeaconError::ScanReadFailed(e.to_string()))?;
            return Ok(ScanEvent::Detection(Detection {
                address: DeviceIdentity::from_bytes(address.0),
                rssi,
            }));
        }
    }
}

// =============================================================================
// PUSH
// =============================================================================

/// RFCOMM + OBEX on the push adapters.
#[derive(Clone)]
pub struct BluetoothPushTransport {
    session: Session,
    adapters: Vec<String>,
    channel: u8,
}

impl BluetoothPushTransport {
    /// Use the push adapters listed in `config`.
    #[must_use]
    pub fn new(session: Session, config: &PushConfig) -> Self {
        Self {
            session,
            adapters: config.adapters.clone(),
            channel: config.obex_channel,
        }
    }
}

impl PushTransport for BluetoothPushTransport {
    type Link = BluetoothPushLink;

    async fn open(&self, adapter: AdapterId) -> Result<BluetoothPushLink> {
        let name = self
            .adapters
            .get(adapter.0)
            .ok_or_else(|| BeaconError::PushOpenFailed {
                adapter: adapter.to_string(),
                message: "no adapter configured".into(),
            })?;
        let handle = open_adapter(&self.session, name)
            .await
            .map_err(|e| BeaconError::PushOpenFailed {
                adapter: name.clone(),
                message: e.to_string(),
            })?;
        let local = handle
            .address()
            .await
            .map_err(|e| BeaconError::PushOpenFailed {
                adapter: name.clone(),
                message: e.to_string(),
            })?;
        Ok(BluetoothPushLink {
            adapter: handle,
            local,
            channel: self.channel,
            target: String::new(),
            client: None,
        })
    }
}

/// One push attempt over RFCOMM.
pub struct BluetoothPushLink {
    adapter: Adapter,
    local: Address,
    channel: u8,
    target: String,
    client: Option<ObexClient<Stream>>,
}

impl BluetoothPushLink {
    fn client(&mut self) -> Result<&mut ObexClient<Stream>> {
        let device = &self.target;
        self.client
            .as_mut()
            .ok_or_else(|| BeaconError::PushTransferFailed {
                device: device.clone(),
                message: "not connected".into(),
            })
    }
}

impl PushLink for BluetoothPushLink {
    async fn discover_channel(&mut self, target: &DeviceIdentity) -> Result<u8> {
        self.target = target.to_string();
        let not_found = || BeaconError::PushChannelNotFound(target.to_string());
        let device = self.adapter.device(to_address(target)?).map_err(|_| not_found())?;
        let uuids = device.uuids().await.map_err(|_| not_found())?.unwrap_or_default();
        if uuids.contains(&OBEX_OBJECT_PUSH_UUID) {
            Ok(self.channel)
        } else {
            Err(not_found())
        }
    }

    async fn connect(&mut self, target: &DeviceIdentity, channel: u8) -> Result<()> {
        let failed = |message: String| BeaconError::PushConnectFailed {
            device: target.to_string(),
            message,
        };
        let socket = Socket::new().map_err(|e| failed(e.to_string()))?;
        socket
            .bind(SocketAddr::new(self.local, 0))
            .map_err(|e| failed(e.to_string()))?;
        let stream = socket
            .connect(SocketAddr::new(to_address(target)?, channel))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut client = ObexClient::new(stream);
        client.connect().await.map_err(|e| failed(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn put_file(&mut self, file: &PushFile) -> Result<()> {
        let data = tokio::fs::read(&file.path).await?;
        let device = self.target.clone();
        self.client()?
            .put(&file.name, &data)
            .await
            .map_err(|e| BeaconError::PushTransferFailed {
                device,
                message: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<()> {
        let device = self.target.clone();
        let result = self.client()?.disconnect().await;
        self.client = None;
        result.map_err(|e| BeaconError::PushDisconnectFailed {
            device,
            message: e.to_string(),
        })
    }

    async fn close(self) {
        if self.client.is_some() {
            warn!(device = %self.target, "Closing link with an open OBEX session");
        }
    }
}

/// Connect to BlueZ and open the scan source and the push transport.
///
/// # Errors
///
/// Returns [`BeaconError::AdapterUnavailable`] if the Bluetooth daemon is
/// unreachable or the scan adapter cannot be powered.
pub async fn open(config: &BeaconConfig) -> Result<(BluetoothScanSource, BluetoothPushTransport)> {
    let session = Session::new()
        .await
        .map_err(|e| BeaconError::AdapterUnavailable {
            adapter: "bluetoothd".into(),
            message: e.to_string(),
        })?;
    let source = BluetoothScanSource::new(&session, &config.scan).await?;
    let transport = BluetoothPushTransport::new(session, &config.push);
    Ok((source, transport))
}
