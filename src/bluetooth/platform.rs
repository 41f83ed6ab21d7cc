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

//! Facade over the operating system's Bluetooth stack.
//!
//! The coordinator only issues requests through [`BluetoothPlatform`] and
//! observes the stack through the [`PlatformEvent`]s it delivers.

use async_trait::async_trait;
use uuid::Uuid;

use super::error::PlatformError;
use super::types::{BondState, DeviceAddress, DeviceIdentity};

/// Serial Port Profile UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Default RFCOMM channel for the serial port service.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Service a streaming connection is opened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceId {
    pub uuid: Uuid,
    pub channel: u8,
}

impl Default for ServiceId {
    fn default() -> Self {
        Self {
            uuid: SPP_UUID,
            channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Adapter power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPower {
    On,
    Off,
}

/// Events delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// A device answered the current discovery window.
    DeviceFound(DeviceIdentity),
    /// The current discovery window ended, by timeout or cancel.
    DiscoveryFinished,
    /// The adapter was switched on or off.
    AdapterStateChanged(AdapterPower),
    /// Bond state of a device changed.
    BondStateChanged {
        address: DeviceAddress,
        state: BondState,
    },
}

/// An open streaming connection.
#[async_trait]
pub trait StreamSocket: Send + 'static {
    /// Address of the remote end.
    fn peer(&self) -> &DeviceAddress;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), PlatformError>;
}

/// Requests the coordinator can make of the Bluetooth stack.
#[async_trait]
pub trait BluetoothPlatform: Send + Sync + 'static {
    type Socket: StreamSocket;

    /// Check that scanning and connecting are permitted.
    async fn ensure_permissions(&self) -> Result<(), PlatformError>;

    async fn is_powered(&self) -> bool;

    async fn set_powered(&self, on: bool) -> Result<(), PlatformError>;

    /// Start a discovery window. Ends with [`PlatformEvent::DiscoveryFinished`].
    async fn start_discovery(&self) -> Result<(), PlatformError>;

    /// Cancel the running discovery window.
    async fn cancel_discovery(&self) -> Result<(), PlatformError>;

    async fn is_discovering(&self) -> bool;

    async fn bonded_devices(&self) -> Result<Vec<DeviceIdentity>, PlatformError>;

    /// Request bonding. Progress is reported through bond state events.
    async fn create_bond(&self, address: &DeviceAddress) -> Result<(), PlatformError>;

    /// Remove a bond. May return [`PlatformError::Unavailable`].
    async fn remove_bond(&self, address: &DeviceAddress) -> Result<(), PlatformError>;

    /// Open a streaming connection. Blocks until connected or failed.
    async fn open_stream(
        &self,
        address: &DeviceAddress,
        service: ServiceId,
    ) -> Result<Self::Socket, PlatformError>;
}
