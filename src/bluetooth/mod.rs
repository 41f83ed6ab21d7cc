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

//! Bluetooth module.
//!
//! Discovery, pairing and RFCOMM connections to nearby devices.

mod bluez;
mod coordinator;
mod error;
mod platform;
mod types;

pub use bluez::{BluezPlatform, BluezSocket};
pub use coordinator::{
    Command, ConnectOutcome, Coordinator, CoordinatorHandle, CoordinatorSettings, RescanPolicy,
};
pub use error::{CoordinatorError, PlatformError};
pub use platform::{
    AdapterPower, BluetoothPlatform, PlatformEvent, ServiceId, StreamSocket,
    DEFAULT_RFCOMM_CHANNEL, SPP_UUID,
};
pub use types::{
    BondState, ConnectionAttempt, DeviceAction, DeviceAddress, DeviceIdentity, DeviceList,
    DeviceOrigin, DeviceRecord, DeviceRow, ScanSession, Upsert, AVAILABLE_HEADER, PAIRED_HEADER,
    UNKNOWN_DEVICE,
};
