// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ implementation of the platform facade.

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, ErrorKind, Session};
use futures::stream::FuturesUnordered;
use futures::{pin_mut, Stream as FuturesStream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::PlatformError;
use super::platform::{AdapterPower, BluetoothPlatform, PlatformEvent, ServiceId, StreamSocket};
use super::types::{BondState, DeviceAddress, DeviceIdentity};

/// A running discovery window.
struct DiscoveryWindow {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Bluetooth platform backed by BlueZ.
pub struct BluezPlatform {
    _session: Session,
    adapter: Adapter,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
    discovery_window: Duration,
    discovery: Mutex<Option<DiscoveryWindow>>,
    /// Set while a window is open; cleared by the window itself.
    discovering: Arc<AtomicBool>,
    monitor: JoinHandle<()>,
}

impl BluezPlatform {
    /// Open a BlueZ session on the named adapter, or the default one.
    ///
    /// Returns the platform and the receiver for its events.
    pub async fn new(
        adapter_name: Option<&str>,
        discovery_window: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PlatformEvent>)> {
        info!("Initializing Bluetooth platform...");

        // Create BlueZ session
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let monitor = Self::spawn_adapter_monitor(&adapter, event_tx.clone()).await?;

        let platform = Self {
            _session: session,
            adapter,
            event_tx,
            discovery_window,
            discovery: Mutex::new(None),
            discovering: Arc::new(AtomicBool::new(false)),
            monitor,
        };

        Ok((Arc::new(platform), event_rx))
    }

    /// Forward adapter power changes as platform events.
    async fn spawn_adapter_monitor(
        adapter: &Adapter,
        event_tx: mpsc::UnboundedSender<PlatformEvent>,
    ) -> Result<JoinHandle<()>> {
        let events = adapter.events().await?;

        Ok(tokio::spawn(async move {
            pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                    let power = if on { AdapterPower::On } else { AdapterPower::Off };
                    if event_tx.send(PlatformEvent::AdapterStateChanged(power)).is_err() {
                        break;
                    }
                }
            }
            debug!("Adapter event stream ended");
        }))
    }

    fn emit(&self, event: PlatformEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for BluezPlatform {
    fn drop(&mut self) {
        self.monitor.abort();
        if let Some(window) = self.discovery.lock().take() {
            window.handle.abort();
        }
    }
}

fn to_bluer(address: &DeviceAddress) -> Result<Address, PlatformError> {
    address
        .as_str()
        .parse::<Address>()
        .map_err(|_| PlatformError::UnknownDevice(address.to_string()))
}

async fn identify(adapter: Adapter, address: Address) -> Option<DeviceIdentity> {
    let device = adapter.device(address).ok()?;
    let name = device.name().await.ok().flatten();
    let address = address.to_string().parse().ok()?;
    Some(DeviceIdentity::new(address, name))
}

/// Collect discovery results until the window closes or is cancelled.
///
/// Name lookups run concurrently with the window so a slow device never
/// delays the deadline or a cancel. Lookups still pending when the window
/// closes are dropped. `running` is cleared before `DiscoveryFinished` is
/// sent, so a restart triggered by that event always opens a new window.
async fn run_discovery_window<S, L, F>(
    devices: S,
    lookup: L,
    mut cancel: oneshot::Receiver<()>,
    window: Duration,
    running: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
) where
    S: FuturesStream<Item = AdapterEvent>,
    L: Fn(Address) -> F,
    F: Future<Output = Option<DeviceIdentity>>,
{
    {
        pin_mut!(devices);
        let mut lookups = FuturesUnordered::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("Discovery window elapsed");
                    break;
                }
                _ = &mut cancel => {
                    debug!("Discovery cancelled");
                    break;
                }
                Some(found) = lookups.next(), if !lookups.is_empty() => {
                    if let Some(identity) = found {
                        let _ = event_tx.send(PlatformEvent::DeviceFound(identity));
                    }
                }
                event = devices.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => lookups.push(lookup(address)),
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    // The discovery stream is dropped above, which stops discovery in BlueZ.
    running.store(false, Ordering::SeqCst);
    let _ = event_tx.send(PlatformEvent::DiscoveryFinished);
}

#[async_trait]
impl BluetoothPlatform for BluezPlatform {
    type Socket = BluezSocket;

    async fn ensure_permissions(&self) -> Result<(), PlatformError> {
        // Property reads fail with NotAuthorized when D-Bus policy denies access.
        self.adapter.is_powered().await?;
        Ok(())
    }

    async fn is_powered(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn set_powered(&self, on: bool) -> Result<(), PlatformError> {
        self.adapter.set_powered(on).await?;
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), PlatformError> {
        if self.is_discovering().await {
            debug!("Discovery already running");
            return Ok(());
        }

        let devices = self.adapter.discover_devices().await?;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let adapter = self.adapter.clone();
        self.discovering.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_discovery_window(
            devices,
            move |address| identify(adapter.clone(), address),
            cancel_rx,
            self.discovery_window,
            self.discovering.clone(),
            self.event_tx.clone(),
        ));

        *self.discovery.lock() = Some(DiscoveryWindow {
            cancel: cancel_tx,
            handle,
        });
        debug!("Discovery window started ({:?})", self.discovery_window);
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<(), PlatformError> {
        let window = self.discovery.lock().take();
        if let Some(window) = window {
            let _ = window.cancel.send(());
            // Wait so the finished event is queued before we return.
            let _ = window.handle.await;
        }
        Ok(())
    }

    async fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceIdentity>, PlatformError> {
        let mut paired = Vec::new();

        for address in self.adapter.device_addresses().await? {
            let device = match self.adapter.device(address) {
                Ok(device) => device,
                Err(_) => continue,
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            let name = device.name().await.ok().flatten();
            if let Ok(address) = address.to_string().parse() {
                paired.push(DeviceIdentity::new(address, name));
            }
        }

        Ok(paired)
    }

    async fn create_bond(&self, address: &DeviceAddress) -> Result<(), PlatformError> {
        let device = self.adapter.device(to_bluer(address)?)?;

        if device.is_paired().await? {
            self.emit(PlatformEvent::BondStateChanged {
                address: address.clone(),
                state: BondState::Bonded,
            });
            return Ok(());
        }

        self.emit(PlatformEvent::BondStateChanged {
            address: address.clone(),
            state: BondState::Bonding,
        });

        let event_tx = self.event_tx.clone();
        let address = address.clone();
        tokio::spawn(async move {
            let state = match device.pair().await {
                Ok(()) => BondState::Bonded,
                Err(err) => {
                    warn!("Pairing with {} failed: {}", address, err);
                    BondState::Unbonded
                }
            };
            let _ = event_tx.send(PlatformEvent::BondStateChanged { address, state });
        });

        Ok(())
    }

    async fn remove_bond(&self, address: &DeviceAddress) -> Result<(), PlatformError> {
        match self.adapter.remove_device(to_bluer(address)?).await {
            Ok(()) => {
                self.emit(PlatformEvent::BondStateChanged {
                    address: address.clone(),
                    state: BondState::Unbonded,
                });
                Ok(())
            }
            Err(err) => match err.kind {
                ErrorKind::NotSupported | ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
                    Err(PlatformError::Unavailable(err.message))
                }
                _ => Err(err.into()),
            },
        }
    }

    async fn open_stream(
        &self,
        address: &DeviceAddress,
        service: ServiceId,
    ) -> Result<Self::Socket, PlatformError> {
        let target = SocketAddr::new(to_bluer(address)?, service.channel);
        info!(
            "Opening RFCOMM stream to {} channel {} (service {})",
            address, service.channel, service.uuid
        );

        let stream = Stream::connect(target).await?;
        Ok(BluezSocket {
            peer: address.clone(),
            stream: Some(stream),
        })
    }
}

/// An RFCOMM connection opened through BlueZ.
pub struct BluezSocket {
    peer: DeviceAddress,
    stream: Option<Stream>,
}

#[async_trait]
impl StreamSocket for BluezSocket {
    fn peer(&self) -> &DeviceAddress {
        &self.peer
    }

    async fn close(&mut self) -> Result<(), PlatformError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{future, stream};

    fn bt(last: u8) -> Address {
        Address::new([0x00, 0x11, 0x22, 0x33, 0x44, last])
    }

    fn identity_of(address: Address) -> Option<DeviceIdentity> {
        let address = address.to_string().parse().ok()?;
        Some(DeviceIdentity::new(address, Some("Sensor".to_string())))
    }

    #[tokio::test]
    async fn test_window_is_closed_before_finished_is_sent() {
        let running = Arc::new(AtomicBool::new(true));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        let task = tokio::spawn(run_discovery_window(
            stream::pending::<AdapterEvent>(),
            |found| async move { identity_of(found) },
            cancel_rx,
            Duration::from_millis(20),
            running.clone(),
            event_tx,
        ));

        assert_eq!(event_rx.recv().await, Some(PlatformEvent::DiscoveryFinished));
        // A restart issued in response must not see the old window as running.
        assert!(!running.load(Ordering::SeqCst));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_name_lookup_does_not_delay_cancel() {
        let running = Arc::new(AtomicBool::new(true));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let devices = stream::iter(vec![
            AdapterEvent::DeviceAdded(bt(1)),
            AdapterEvent::DeviceAdded(bt(2)),
        ])
        .chain(stream::pending());

        let task = tokio::spawn(run_discovery_window(
            devices,
            |found: Address| async move {
                if found == bt(2) {
                    future::pending::<()>().await;
                }
                identity_of(found)
            },
            cancel_rx,
            Duration::from_secs(60),
            running.clone(),
            event_tx,
        ));

        match event_rx.recv().await {
            Some(PlatformEvent::DeviceFound(identity)) => {
                assert_eq!(identity.address.as_str(), "00:11:22:33:44:01");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        cancel_tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap();
        assert_eq!(finished, Some(PlatformEvent::DiscoveryFinished));

        // The pending lookup was dropped with the window.
        assert_eq!(event_rx.recv().await, None);
        assert!(!running.load(Ordering::SeqCst));
        task.await.unwrap();
    }
}
