//! Starts the beacon's tasks and keeps them running until shutdown.
//!
//! Startup order: location advertisement, control radio and gateway link,
//! dedup janitor, then the scanner on the current task. The scanner only
//! returns on a fatal hardware error, which ends the process.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use lbeacon_core::{
    BeaconConfig, CacheJanitor, ControlPacket, ControlRadio, DedupCache, DeviceScanner,
    DispatchPool, GatewayLink, PushTransport, ScanSource,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::advertise::advertise;
use crate::xbee_radio::{self, XbeeRadio};

/// Inbound control packets buffered between the radio and the link.
const CONTROL_QUEUE: usize = 32;

/// A control radio together with the packets it receives.
pub struct Gateway<R> {
    /// Outbound side.
    pub radio: R,
    /// Inbound side.
    pub packets: mpsc::Receiver<ControlPacket>,
}

/// Run the beacon on real hardware until shutdown or a fatal scan error.
///
/// # Errors
///
/// Returns an error if the Bluetooth adapters cannot be opened or scanning
/// stops on a hardware failure.
pub async fn run(config: BeaconConfig) -> anyhow::Result<()> {
    advertise(&config).await;
    let gateway = open_gateway(&config);
    let (source, transport) = open_radios(&config).await?;
    run_with(&config, source, transport, gateway, shutdown_signal()).await
}

/// Open the serial control radio and start its reader thread.
///
/// A missing control radio only disables the gateway link.
fn open_gateway(config: &BeaconConfig) -> Option<Gateway<XbeeRadio<Box<dyn serialport::SerialPort>>>> {
    let (radio, reader) = match xbee_radio::open(&config.gateway) {
        Ok(opened) => opened,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Control radio unavailable, gateway link disabled");
            return None;
        }
    };
    let (tx, packets) = mpsc::channel(CONTROL_QUEUE);
    tokio::task::spawn_blocking(move || xbee_radio::read_packets(reader, &tx));
    Some(Gateway { radio, packets })
}

#[cfg(feature = "mock-bluetooth")]
#[allow(clippy::unused_async)]
async fn open_radios(
    config: &BeaconConfig,
) -> anyhow::Result<(lbeacon_core::mock::MockScanSource, lbeacon_core::mock::MockPushTransport)> {
    warn!("Using mock Bluetooth radios");
    Ok((
        lbeacon_core::mock::MockScanSource::idle(config.scan.session_length()),
        lbeacon_core::mock::MockPushTransport::new(),
    ))
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn open_radios(
    config: &BeaconConfig,
) -> anyhow::Result<(
    lbeacon_core::BluetoothScanSource,
    lbeacon_core::BluetoothPushTransport,
)> {
    lbeacon_core::bluetooth::open(config)
        .await
        .context("failed to open Bluetooth adapters")
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable the `bluetooth` or `mock-bluetooth` feature");

/// Run the pipeline on the given hardware until `shutdown` resolves or the
/// scanner fails.
///
/// # Errors
///
/// Returns the scanner's fatal error.
pub async fn run_with<S, T, R, F>(
    config: &BeaconConfig,
    source: S,
    transport: T,
    gateway: Option<Gateway<R>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    S: ScanSource,
    T: PushTransport,
    R: ControlRadio + 'static,
    F: Future<Output = ()>,
{
    let gateway_task = gateway.map(|Gateway { radio, packets }| {
        tokio::spawn(GatewayLink::new(radio).run(packets))
    });

    let dedup = DedupCache::from_config(&config.dedup).shared();
    let janitor = tokio::spawn(CacheJanitor::new(dedup.clone(), config.dedup.sweep_interval()).run());

    let pool = Arc::new(DispatchPool::new(&config.push, dedup, Arc::new(transport)));
    info!(
        slots = pool.capacity(),
        adapters = config.push.adapters.len(),
        file = %config.push.file_path.join(&config.push.file_name).display(),
        "Dispatch pool ready"
    );
    let scanner = DeviceScanner::new(source, pool, config.scan.rssi_threshold);

    let result = tokio::select! {
        result = scanner.run() => result.context("device scanner stopped"),
        () = shutdown => {
            info!("Shutting down");
            Ok(())
        }
    };

    janitor.abort();
    if let Some(task) = gateway_task {
        task.abort();
    }
    result
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating shutdown...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lbeacon_core::gateway::HEALTH_ACK;
    use lbeacon_core::mock::{ControlEvent, MockControlRadio, MockPushTransport, MockScanSource};
    use lbeacon_core::{DeviceIdentity, Detection, GatewayAddress, PushStep, ScanEvent};
    use tokio::sync::oneshot;

    const GATEWAY: GatewayAddress = GatewayAddress([0, 0x13, 0xA2, 0, 0x40, 0, 0, 0x0A]);

    fn no_gateway() -> Option<Gateway<MockControlRadio>> {
        None
    }

    #[tokio::test]
    async fn test_scan_failure_ends_run_with_error() {
        let config = BeaconConfig::default();
        let source = MockScanSource::new(vec![vec![Ok(ScanEvent::Detection(Detection {
            address: DeviceIdentity::parse("AA:BB:CC:DD:EE:01").unwrap(),
            rssi: Some(-50),
        }))]]);
        let transport = MockPushTransport::new();

        let result = run_with(
            &config,
            source,
            transport.clone(),
            no_gateway(),
            std::future::pending(),
        )
        .await;
        assert!(result.is_err());

        // The push worker runs on its own task.
        for _ in 0..1000 {
            if transport.calls().iter().any(|c| c.step == PushStep::Close) {
                break;
            }
            tokio::task::yield_now().await;
        }
        let steps: Vec<PushStep> = transport.calls().iter().map(|c| c.step).collect();
        assert_eq!(steps.first(), Some(&PushStep::Open));
        assert_eq!(steps.last(), Some(&PushStep::Close));
    }

    #[tokio::test]
    async fn test_shutdown_ends_run_cleanly() {
        let config = BeaconConfig::default();
        let source = MockScanSource::idle(Duration::from_secs(61));

        let result = run_with(
            &config,
            source,
            MockPushTransport::new(),
            no_gateway(),
            std::future::ready(()),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_gateway_link_answers_while_scanning() {
        let config = BeaconConfig::default();
        let radio = MockControlRadio::new();
        let (tx, packets) = mpsc::channel(8);
        let (stop, stopped) = oneshot::channel::<()>();

        let gateway = Some(Gateway {
            radio: radio.clone(),
            packets,
        });
        let run = run_with(
            &config,
            MockScanSource::idle(Duration::from_secs(61)),
            MockPushTransport::new(),
            gateway,
            async {
                let _ = stopped.await;
            },
        );
        let drive = async {
            tx.send(ControlPacket::new(GATEWAY, *b"b")).await.unwrap();
            tx.send(ControlPacket::new(GATEWAY, *b"r")).await.unwrap();
            for _ in 0..1000 {
                if radio.events().len() >= 2 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            let _ = stop.send(());
        };

        let (result, ()) = tokio::join!(run, drive);
        assert!(result.is_ok());
        let events = radio.events();
        assert_eq!(events[0], ControlEvent::Connected(GATEWAY));
        assert_eq!(events[1], ControlEvent::Sent(GATEWAY, vec![HEALTH_ACK]));
    }
}
