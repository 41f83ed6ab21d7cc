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

//! Device records, the device list and the scan/connection state types.

use std::fmt;
use std::str::FromStr;

/// Header shown above the paired devices.
pub const PAIRED_HEADER: &str = "=== Paired Devices ===";

/// Header shown above the devices found by discovery.
pub const AVAILABLE_HEADER: &str = "=== Available Devices ===";

/// Name shown for devices that did not report one.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Hardware address of a remote device.
///
/// Addresses are compared case-insensitively, so they are stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty device address".to_string());
        }
        Ok(Self(trimmed.to_uppercase()))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bond (pairing) state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    Unbonded,
    Bonding,
    Bonded,
}

/// Where a record in the device list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrigin {
    /// Enumerated from the adapter's bonded set.
    Paired,
    /// Reported by a discovery window.
    Discovered,
}

/// Identity of a device as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(address: DeviceAddress, name: Option<String>) -> Self {
        // Some stacks report an empty string instead of no name.
        let name = name.filter(|n| !n.trim().is_empty());
        Self { address, name }
    }
}

/// A device shown in the device list.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub bond_state: BondState,
    pub origin: DeviceOrigin,
}

impl DeviceRecord {
    fn paired(identity: DeviceIdentity) -> Self {
        Self {
            address: identity.address,
            name: identity.name,
            bond_state: BondState::Bonded,
            origin: DeviceOrigin::Paired,
        }
    }

    fn discovered(identity: DeviceIdentity) -> Self {
        Self {
            address: identity.address,
            name: identity.name,
            bond_state: BondState::Unbonded,
            origin: DeviceOrigin::Discovered,
        }
    }

    /// Name for messages, falling back to "Unknown Device".
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE)
    }

    /// Two-line label used by the device list.
    pub fn label(&self) -> String {
        format!("{}\n{}", self.display_name(), self.address)
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state == BondState::Bonded
    }
}

/// Result of feeding a discovered device into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Renamed,
    Unchanged,
}

/// One line of the presented device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRow {
    Header(String),
    Device {
        address: DeviceAddress,
        label: String,
        bond_state: BondState,
    },
}

/// Ordered list of paired and discovered devices, unique by address.
#[derive(Debug, Default, Clone)]
pub struct DeviceList {
    records: Vec<DeviceRecord>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the paired sublist with a fresh enumeration.
    ///
    /// Discovered entries for addresses that are now paired are dropped.
    pub fn replace_paired(&mut self, paired: Vec<DeviceIdentity>) {
        let mut fresh: Vec<DeviceRecord> = Vec::with_capacity(paired.len());
        for identity in paired {
            if fresh.iter().any(|r| r.address == identity.address) {
                continue;
            }
            fresh.push(DeviceRecord::paired(identity));
        }

        let discovered: Vec<DeviceRecord> = self
            .records
            .drain(..)
            .filter(|r| r.origin == DeviceOrigin::Discovered)
            .filter(|r| !fresh.iter().any(|p| p.address == r.address))
            .collect();

        fresh.extend(discovered);
        self.records = fresh;
    }

    pub fn clear_discovered(&mut self) {
        self.records.retain(|r| r.origin == DeviceOrigin::Paired);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Add a device reported by discovery.
    ///
    /// The address is the identity key: an existing record keeps its place,
    /// origin and bond state, and only takes over a newly reported name.
    pub fn upsert_discovered(&mut self, identity: DeviceIdentity) -> Upsert {
        if let Some(existing) = self.records.iter_mut().find(|r| r.address == identity.address) {
            return match identity.name {
                Some(name) if existing.name.as_deref() != Some(name.as_str()) => {
                    existing.name = Some(name);
                    Upsert::Renamed
                }
                _ => Upsert::Unchanged,
            };
        }

        self.records.push(DeviceRecord::discovered(identity));
        Upsert::Inserted
    }

    /// Update the bond state of a known device, returning the previous state.
    pub fn set_bond_state(&mut self, address: &DeviceAddress, state: BondState) -> Option<BondState> {
        let record = self.records.iter_mut().find(|r| &r.address == address)?;
        let previous = record.bond_state;
        record.bond_state = state;
        Some(previous)
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| &r.address == address)
    }

    pub fn paired(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter().filter(|r| r.origin == DeviceOrigin::Paired)
    }

    pub fn discovered(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter().filter(|r| r.origin == DeviceOrigin::Discovered)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Presentation rows with section headers.
    pub fn rows(&self) -> Vec<DeviceRow> {
        let mut rows = Vec::with_capacity(self.records.len() + 2);

        let mut paired = self.paired().peekable();
        if paired.peek().is_some() {
            rows.push(DeviceRow::Header(PAIRED_HEADER.to_string()));
            rows.extend(paired.map(Self::row));
        }

        rows.push(DeviceRow::Header(AVAILABLE_HEADER.to_string()));
        rows.extend(self.discovered().map(Self::row));
        rows
    }

    fn row(record: &DeviceRecord) -> DeviceRow {
        DeviceRow::Device {
            address: record.address.clone(),
            label: record.label(),
            bond_state: record.bond_state,
        }
    }
}

/// A single logical run of discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSession {
    Idle,
    Requested,
    Active,
    StoppingByUser,
    Finished,
}

/// The one pair/connect attempt the coordinator tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAttempt {
    Idle,
    Pairing(DeviceAddress),
    Connecting(DeviceAddress),
    Connected(DeviceAddress),
    Failed { address: DeviceAddress, reason: String },
}

impl ConnectionAttempt {
    pub fn target(&self) -> Option<&DeviceAddress> {
        match self {
            Self::Idle => None,
            Self::Pairing(a) | Self::Connecting(a) | Self::Connected(a) => Some(a),
            Self::Failed { address, .. } => Some(address),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pairing(_) | Self::Connecting(_))
    }
}

/// Choices offered when a device is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Pair,
    Connect,
    Unpair,
    Cancel,
}

impl DeviceAction {
    /// Options for a device in the given bond state.
    pub fn options_for(bond_state: BondState) -> &'static [DeviceAction] {
        match bond_state {
            BondState::Bonded => &[DeviceAction::Connect, DeviceAction::Unpair, DeviceAction::Cancel],
            _ => &[DeviceAction::Pair, DeviceAction::Cancel],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAction::Pair => "Pair",
            DeviceAction::Connect => "Connect",
            DeviceAction::Unpair => "Unpair",
            DeviceAction::Cancel => "Cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> DeviceAddress {
        s.parse().unwrap()
    }

    fn identity(address: &str, name: Option<&str>) -> DeviceIdentity {
        DeviceIdentity::new(addr(address), name.map(str::to_string))
    }

    #[test]
    fn test_address_is_case_insensitive() {
        let a: DeviceAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b: DeviceAddress = " AA:BB:CC:DD:EE:FF ".parse().unwrap();
        assert_eq!(a, b);
        assert!("  ".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_repeated_discovery_keeps_one_record() {
        let mut list = DeviceList::new();
        assert_eq!(list.upsert_discovered(identity("AA:BB", Some("Speaker"))), Upsert::Inserted);
        assert_eq!(list.upsert_discovered(identity("11:22", None)), Upsert::Inserted);
        assert_eq!(list.upsert_discovered(identity("aa:bb", None)), Upsert::Unchanged);
        assert_eq!(list.upsert_discovered(identity("AA:BB", Some("Kitchen"))), Upsert::Renamed);

        assert_eq!(list.len(), 2);
        let first = list.discovered().next().unwrap();
        assert_eq!(first.address.as_str(), "AA:BB");
        assert_eq!(first.name.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn test_rows_have_section_headers() {
        let mut list = DeviceList::new();
        list.upsert_discovered(identity("11:22", None));
        assert_eq!(
            list.rows(),
            vec![
                DeviceRow::Header(AVAILABLE_HEADER.to_string()),
                DeviceRow::Device {
                    address: addr("11:22"),
                    label: "Unknown Device\n11:22".to_string(),
                    bond_state: BondState::Unbonded,
                },
            ]
        );

        list.replace_paired(vec![identity("33:44", Some("Headset"))]);
        let rows = list.rows();
        assert_eq!(rows[0], DeviceRow::Header(PAIRED_HEADER.to_string()));
        assert!(matches!(&rows[1], DeviceRow::Device { label, .. } if label == "Headset\n33:44"));
        assert_eq!(rows[2], DeviceRow::Header(AVAILABLE_HEADER.to_string()));
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_replace_paired_moves_newly_bonded_device() {
        let mut list = DeviceList::new();
        list.upsert_discovered(identity("AA:BB", Some("Speaker")));
        list.upsert_discovered(identity("11:22", None));

        list.replace_paired(vec![identity("AA:BB", Some("Speaker"))]);

        assert_eq!(list.len(), 2);
        assert_eq!(list.paired().count(), 1);
        assert_eq!(list.discovered().count(), 1);
        assert!(list.get(&addr("AA:BB")).unwrap().is_bonded());
    }

    #[test]
    fn test_clear_discovered_keeps_paired() {
        let mut list = DeviceList::new();
        list.replace_paired(vec![identity("33:44", None)]);
        list.upsert_discovered(identity("11:22", None));
        list.clear_discovered();
        assert_eq!(list.len(), 1);
        assert_eq!(list.paired().count(), 1);
    }

    #[test]
    fn test_device_options() {
        assert_eq!(
            DeviceAction::options_for(BondState::Bonded),
            &[DeviceAction::Connect, DeviceAction::Unpair, DeviceAction::Cancel]
        );
        assert_eq!(
            DeviceAction::options_for(BondState::Bonding),
            &[DeviceAction::Pair, DeviceAction::Cancel]
        );
    }
}
